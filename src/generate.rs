use anyhow::{bail, Context, Result};
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::config::GenerationConfig;
use crate::error::DecodeError;
use crate::sampling::Sampler;
use crate::tokenizer::TextTokenizer;

/// A sequence model that carries its history in an explicit recurrent state.
pub trait LanguageModel {
    /// Opaque per-sequence state, handed back unchanged on the next call.
    type State;

    fn vocab_size(&self) -> usize;

    /// Runs `input_ids` through the model. `state = None` starts a new
    /// sequence. Returns logits of shape `(1, input_ids.len(), vocab_size)`
    /// and the state after the last input id.
    fn step(&self, input_ids: &[u32], state: Option<Self::State>)
        -> Result<(Tensor, Self::State)>;
}

/// Extracts the score vector of the final position from `(1, seq_len, vocab)` logits.
pub fn last_position_logits(logits: &Tensor, vocab_size: usize) -> Result<Vec<f32>> {
    let (batch, seq_len, vocab) = logits.dims3().context("logits rank")?;
    if batch != 1 || seq_len == 0 {
        bail!("expected logits of shape (1, seq_len>0, V), got {:?}", logits.dims());
    }
    if vocab != vocab_size {
        bail!("logits width {vocab} does not match vocab_size {vocab_size}");
    }
    let last = logits
        .narrow(1, seq_len - 1, 1)
        .context("slice last position")?
        .squeeze(1)
        .context("squeeze seq dim")?
        .squeeze(0)
        .context("squeeze batch dim")?;
    last.to_vec1().context("logits to_vec1")
}

/// Generates ids from BOS until EOS or `cfg.max_length`, drawing randomness from `rng`.
///
/// The end token is never part of the result.
pub fn decode_ids_with_rng<M, T, R>(
    model: &M,
    tokenizer: &T,
    cfg: &GenerationConfig,
    rng: &mut R,
) -> Result<Vec<u32>, DecodeError>
where
    M: LanguageModel,
    T: TextTokenizer,
    R: Rng + ?Sized,
{
    let vocab_size = model.vocab_size();
    cfg.validate(vocab_size)?;
    let sampler = Sampler::from_config(cfg);
    let eos = tokenizer.eos_token_id();

    let mut emitted: Vec<u32> = Vec::with_capacity(cfg.max_length.min(4096));
    let mut state: Option<M::State> = None;
    let mut current_input = tokenizer.bos_token_id();

    while emitted.len() < cfg.max_length {
        let (logits, next_state) = model
            .step(&[current_input], state.take())
            .map_err(DecodeError::Model)?;
        state = Some(next_state);

        let scores = last_position_logits(&logits, vocab_size).map_err(DecodeError::Model)?;
        let next = sampler.select(&scores, rng)?;
        trace!(step = emitted.len(), input = current_input, next, "selected token");

        if next == eos {
            debug!(emitted = emitted.len(), "hit end-of-sequence token");
            return Ok(emitted);
        }
        emitted.push(next);
        current_input = next;
    }

    debug!(emitted = emitted.len(), "reached max_length");
    Ok(emitted)
}

/// Like [`decode_ids_with_rng`], but returns the decoded text.
pub fn decode_with_rng<M, T, R>(
    model: &M,
    tokenizer: &T,
    cfg: &GenerationConfig,
    rng: &mut R,
) -> Result<String, DecodeError>
where
    M: LanguageModel,
    T: TextTokenizer,
    R: Rng + ?Sized,
{
    let ids = decode_ids_with_rng(model, tokenizer, cfg, rng)?;
    tokenizer.decode(&ids).map_err(DecodeError::Tokenizer)
}

/// Decodes one sequence, seeding the RNG from `cfg.seed` or OS entropy.
pub fn decode<M, T>(model: &M, tokenizer: &T, cfg: &GenerationConfig) -> Result<String, DecodeError>
where
    M: LanguageModel,
    T: TextTokenizer,
{
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    decode_with_rng(model, tokenizer, cfg, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn last_position_picks_final_row() -> Result<()> {
        let t = Tensor::from_vec(vec![0f32, 1., 2., 3., 4., 5.], (1, 2, 3), &Device::Cpu)?;
        assert_eq!(last_position_logits(&t, 3)?, vec![3., 4., 5.]);
        Ok(())
    }

    #[test]
    fn last_position_rejects_wrong_width() -> Result<()> {
        let t = Tensor::zeros((1, 1, 4), candle_core::DType::F32, &Device::Cpu)?;
        let err = last_position_logits(&t, 5).expect_err("width mismatch");
        assert!(format!("{err:#}").contains("does not match vocab_size 5"));
        Ok(())
    }

    #[test]
    fn last_position_rejects_batched_logits() -> Result<()> {
        let t = Tensor::zeros((2, 1, 3), candle_core::DType::F32, &Device::Cpu)?;
        assert!(last_position_logits(&t, 3).is_err());
        Ok(())
    }
}
