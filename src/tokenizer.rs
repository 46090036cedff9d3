use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tokenizers::Tokenizer;

/// What the decoder needs from a tokenizer.
pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Must accept any id sequence, including an empty one.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn bos_token_id(&self) -> u32;

    fn eos_token_id(&self) -> u32;
}

/// Raw bytes as ids `0..=255`, followed by the two special ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const BOS: u32 = 256;
    pub const EOS: u32 = 257;
    pub const VOCAB_SIZE: usize = 258;

    pub fn new() -> Self {
        Self
    }
}

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter_map(|&id| u8::try_from(id).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn bos_token_id(&self) -> u32 {
        Self::BOS
    }

    fn eos_token_id(&self) -> u32 {
        Self::EOS
    }
}

/// A HuggingFace `tokenizer.json` with its BOS/EOS ids resolved up front.
pub struct HfTokenizer {
    inner: Tokenizer,
    bos_token_id: u32,
    eos_token_id: u32,
}

pub const DEFAULT_BOS_TOKEN: &str = "<s>";
pub const DEFAULT_EOS_TOKEN: &str = "</s>";

impl HfTokenizer {
    pub fn from_file(path: &Path, bos_token: &str, eos_token: &str) -> Result<Self> {
        if !path.exists() {
            bail!("missing tokenizer.json at {path:?}");
        }
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("load {path:?}"))?;
        let bos_token_id = inner
            .token_to_id(bos_token)
            .with_context(|| format!("bos token {bos_token:?} not in vocabulary"))?;
        let eos_token_id = inner
            .token_to_id(eos_token)
            .with_context(|| format!("eos token {eos_token:?} not in vocabulary"))?;
        Ok(Self {
            inner,
            bos_token_id,
            eos_token_id,
        })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("{e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow!("{e}"))
    }

    fn bos_token_id(&self) -> u32 {
        self.bos_token_id
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Byte,
    HuggingFace,
}

pub enum AnyTokenizer {
    Byte(ByteTokenizer),
    Hf(Box<HfTokenizer>),
}

impl TextTokenizer for AnyTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        match self {
            Self::Byte(t) => t.encode(text),
            Self::Hf(t) => t.encode(text),
        }
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        match self {
            Self::Byte(t) => t.decode(ids),
            Self::Hf(t) => t.decode(ids),
        }
    }

    fn bos_token_id(&self) -> u32 {
        match self {
            Self::Byte(t) => t.bos_token_id(),
            Self::Hf(t) => t.bos_token_id(),
        }
    }

    fn eos_token_id(&self) -> u32 {
        match self {
            Self::Byte(t) => t.eos_token_id(),
            Self::Hf(t) => t.eos_token_id(),
        }
    }
}

pub fn load_tokenizer(model_dir: &Path, kind: TokenizerKind) -> Result<AnyTokenizer> {
    match kind {
        TokenizerKind::Byte => Ok(AnyTokenizer::Byte(ByteTokenizer::new())),
        TokenizerKind::HuggingFace => {
            let tok = HfTokenizer::from_file(
                &model_dir.join("tokenizer.json"),
                DEFAULT_BOS_TOKEN,
                DEFAULT_EOS_TOKEN,
            )?;
            Ok(AnyTokenizer::Hf(Box::new(tok)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn byte_tokenizer_round_trips_utf8() -> Result<()> {
        let tok = ByteTokenizer::new();
        let ids = tok.encode("héllo")?;
        assert_eq!(ids.len(), 6);
        assert_eq!(tok.decode(&ids)?, "héllo");
        Ok(())
    }

    #[test]
    fn byte_tokenizer_decode_skips_specials_and_is_total() -> Result<()> {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.decode(&[])?, "");
        assert_eq!(tok.decode(&[ByteTokenizer::BOS, 104, 105, ByteTokenizer::EOS])?, "hi");
        assert_eq!(tok.decode(&[0xff])?, "\u{fffd}");
        Ok(())
    }

    #[test]
    fn missing_tokenizer_json_is_error() {
        let dir = tempdir().expect("tempdir");
        let err = load_tokenizer(dir.path(), TokenizerKind::HuggingFace)
            .err()
            .expect("should fail");
        assert!(format!("{err:#}").contains("missing tokenizer.json"));
    }

    #[test]
    fn hf_tokenizer_resolves_special_ids() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join("tokenizer.json"),
            br#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": { "<s>": 0, "</s>": 1, "hello": 2, "world": 3, "<unk>": 4 },
    "unk_token": "<unk>"
  }
}"#,
        )?;
        let tok = load_tokenizer(dir.path(), TokenizerKind::HuggingFace)?;
        assert_eq!(tok.bos_token_id(), 0);
        assert_eq!(tok.eos_token_id(), 1);
        let ids = tok.encode("hello world")?;
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(tok.decode(&ids)?, "hello world");
        assert_eq!(tok.decode(&[])?, "");
        Ok(())
    }

    #[test]
    fn byte_kind_needs_no_files() -> Result<()> {
        let dir = tempdir()?;
        let tok = load_tokenizer(dir.path(), TokenizerKind::Byte)?;
        assert_eq!(tok.bos_token_id(), ByteTokenizer::BOS);
        assert_eq!(tok.eos_token_id(), ByteTokenizer::EOS);
        Ok(())
    }
}
