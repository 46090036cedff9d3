use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::DecodeError;

/// Shape of a GRU language model, read from `config.json` next to the weights.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,

    #[serde(default)]
    pub embedding_dim: Option<usize>,
}

pub fn load_model_spec(model_dir: &Path) -> Result<ModelSpec> {
    let path = model_dir.join("config.json");
    let bytes = std::fs::read(&path).with_context(|| format!("read {path:?}"))?;
    let spec: ModelSpec =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {path:?}"))?;
    Ok(spec)
}

impl ModelSpec {
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim.unwrap_or(self.hidden_size)
    }
}

/// Settings for one decode call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerationConfig {
    /// Logit divisor; `0.0` selects greedy arg-max decoding.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Restrict sampling to the `k` most probable ids.
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Hard cap on emitted tokens (the end token is never counted).
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Sampling seed (None = OS entropy).
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_length() -> usize {
    1024
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: None,
            max_length: default_max_length(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn greedy(max_length: usize) -> Self {
        Self {
            temperature: 0.0,
            max_length,
            ..Default::default()
        }
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read {path:?}"))?;
        serde_json::from_str(&content).with_context(|| format!("parse {path:?}"))
    }

    /// Checks the settings against a vocabulary of `vocab_size` ids.
    pub fn validate(&self, vocab_size: usize) -> Result<(), DecodeError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(DecodeError::InvalidConfig(format!(
                "temperature must be finite and >= 0, got {}",
                self.temperature
            )));
        }
        if let Some(k) = self.top_k {
            if k == 0 {
                return Err(DecodeError::InvalidConfig(
                    "top_k must be positive".to_string(),
                ));
            }
            if k > vocab_size {
                return Err(DecodeError::InvalidConfig(format!(
                    "top_k {k} exceeds vocabulary size {vocab_size}"
                )));
            }
        }
        Ok(())
    }
}
