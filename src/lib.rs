//! Autoregressive text decoding for recurrent language models.
//!
//! The core is [`generate::decode`]: starting from the tokenizer's BOS id it
//! feeds one token at a time into a [`generate::LanguageModel`], threading
//! the model's recurrent state between steps, and picks each next token by
//! greedy arg-max or temperature / top-k sampling until EOS or
//! `max_length`.

pub mod config;
pub mod error;
pub mod generate;
pub mod loader;
pub mod model;
pub mod sampling;
pub mod tokenizer;

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device};
use std::path::Path;
use tracing::{debug, info};

pub use config::GenerationConfig;
pub use error::DecodeError;
pub use generate::{decode, LanguageModel};
pub use tokenizer::TextTokenizer;

pub struct Runtime {
    pub device: Device,
    pub dtype: DType,
}

impl Runtime {
    pub fn cpu_f32() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }
}

pub fn init(
    model_dir: &Path,
    kind: tokenizer::TokenizerKind,
) -> Result<(tokenizer::AnyTokenizer, model::Gru)> {
    let rt = Runtime::cpu_f32();
    let spec = config::load_model_spec(model_dir).context("load config.json")?;
    debug!(?spec, "loaded model spec");
    let tokenizer = tokenizer::load_tokenizer(model_dir, kind).context("load tokenizer")?;
    check_special_ids(&tokenizer, spec.vocab_size).context("tokenizer/model mismatch")?;
    let weights = loader::load_gru_weights(model_dir, &spec, &rt).context("load weights")?;
    let model = model::Gru::new(spec, weights, &rt).context("build model")?;
    Ok((tokenizer, model))
}

/// BOS and EOS must both be ids the model can consume and emit.
fn check_special_ids<T: TextTokenizer>(tokenizer: &T, vocab_size: usize) -> Result<()> {
    for (name, id) in [
        ("bos", tokenizer.bos_token_id()),
        ("eos", tokenizer.eos_token_id()),
    ] {
        if id as usize >= vocab_size {
            bail!("{name} token id {id} out of range for model vocab_size {vocab_size}");
        }
    }
    Ok(())
}

pub fn run(
    model_dir: &Path,
    kind: tokenizer::TokenizerKind,
    cfg: &GenerationConfig,
) -> Result<String> {
    let (tokenizer, model) = init(model_dir, kind)?;
    info!(
        temperature = cfg.temperature,
        top_k = ?cfg.top_k,
        max_length = cfg.max_length,
        "decoding"
    );
    let text = decode(&model, &tokenizer, cfg).context("decode")?;
    Ok(text)
}
