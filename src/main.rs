use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::Level;

use gru_decode::tokenizer::TokenizerKind;
use gru_decode::GenerationConfig;

#[derive(Parser, Debug)]
#[command(
    name = "gru-decode",
    version,
    about = "Sample text from a GRU language model (Candle backend)"
)]
struct Args {
    #[arg(long)]
    model_dir: PathBuf,

    /// JSON file with generation settings; explicit flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// 0 selects greedy decoding.
    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long)]
    max_length: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = TokenizerArg::Byte)]
    tokenizer: TokenizerArg,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum TokenizerArg {
    Byte,
    Hf,
}

impl From<TokenizerArg> for TokenizerKind {
    fn from(value: TokenizerArg) -> Self {
        match value {
            TokenizerArg::Byte => TokenizerKind::Byte,
            TokenizerArg::Hf => TokenizerKind::HuggingFace,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl Args {
    fn generation_config(&self) -> Result<GenerationConfig> {
        let mut cfg = match &self.config {
            Some(path) => GenerationConfig::from_json(path).context("load generation config")?,
            None => GenerationConfig::default(),
        };
        if let Some(t) = self.temperature {
            cfg.temperature = t;
        }
        if self.top_k.is_some() {
            cfg.top_k = self.top_k;
        }
        if let Some(n) = self.max_length {
            cfg.max_length = n;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(Level::from(args.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = args.generation_config()?;
    let out = gru_decode::run(&args.model_dir, args.tokenizer.into(), &cfg)?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_defaults_match_generation_defaults() {
        let args = Args::try_parse_from(["gru-decode", "--model-dir", "/tmp/gru"])
            .expect("should parse");
        assert_eq!(args.tokenizer, TokenizerArg::Byte);
        let cfg = args.generation_config().expect("config");
        assert_eq!(cfg, GenerationConfig::default());
    }

    #[test]
    fn cli_parses_sampling_flags() {
        let args = Args::try_parse_from([
            "gru-decode",
            "--model-dir",
            "/tmp/gru",
            "--temperature",
            "0.7",
            "--top-k",
            "10",
            "--max-length",
            "64",
            "--seed",
            "5",
            "--tokenizer",
            "hf",
        ])
        .expect("should parse");
        assert_eq!(args.tokenizer, TokenizerArg::Hf);
        let cfg = args.generation_config().expect("config");
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.top_k, Some(10));
        assert_eq!(cfg.max_length, 64);
        assert_eq!(cfg.seed, Some(5));
    }

    #[test]
    fn cli_flags_override_config_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("gen.json");
        std::fs::write(&path, br#"{ "temperature": 0.0, "top_k": 3, "max_length": 9 }"#)?;
        let args = Args::try_parse_from([
            "gru-decode",
            "--model-dir",
            "/tmp/gru",
            "--config",
            path.to_str().expect("utf8 path"),
            "--max-length",
            "2",
        ])?;
        let cfg = args.generation_config()?;
        assert_eq!(cfg.temperature, 0.0);
        assert_eq!(cfg.top_k, Some(3));
        assert_eq!(cfg.max_length, 2);
        Ok(())
    }

    #[test]
    fn cli_requires_model_dir() {
        assert!(Args::try_parse_from(["gru-decode"]).is_err());
    }

    #[test]
    fn cli_rejects_unknown_tokenizer() {
        let bad = Args::try_parse_from([
            "gru-decode",
            "--model-dir",
            "/tmp/gru",
            "--tokenizer",
            "sentencepiece",
        ]);
        assert!(bad.is_err());
    }
}
