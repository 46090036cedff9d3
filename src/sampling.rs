//! Next-token selection: greedy arg-max, or temperature-scaled sampling
//! optionally restricted to the top-k candidates.

use std::cmp::Ordering;

use rand::Rng;

use crate::config::GenerationConfig;
use crate::error::DecodeError;

/// Index of the largest score. Ties go to the lowest id.
pub fn argmax(logits: &[f32]) -> Result<u32, DecodeError> {
    if logits.is_empty() {
        return Err(DecodeError::DegenerateDistribution(
            "empty logits".to_string(),
        ));
    }
    let (mut best_id, mut best_val) = (0u32, f32::NEG_INFINITY);
    for (i, &val) in logits.iter().enumerate() {
        if val.is_nan() {
            return Err(DecodeError::DegenerateDistribution(format!(
                "NaN score at id {i}"
            )));
        }
        if val > best_val {
            best_val = val;
            best_id = i as u32;
        }
    }
    if best_val == f32::NEG_INFINITY {
        return Err(DecodeError::DegenerateDistribution(
            "no finite scores".to_string(),
        ));
    }
    Ok(best_id)
}

/// Softmax with the max subtracted before exponentiating.
///
/// `-inf` entries are allowed and map to probability zero; NaN, `+inf`, or
/// a row that is entirely `-inf` is rejected.
pub fn softmax(scores: &[f32]) -> Result<Vec<f32>, DecodeError> {
    let mut max = f32::NEG_INFINITY;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() || s == f32::INFINITY {
            return Err(DecodeError::DegenerateDistribution(format!(
                "non-finite score {s} at id {i}"
            )));
        }
        max = max.max(s);
    }
    if max == f32::NEG_INFINITY {
        return Err(DecodeError::DegenerateDistribution(
            "no finite scores".to_string(),
        ));
    }

    let mut probs: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(DecodeError::DegenerateDistribution(format!(
            "probability mass {sum}"
        )));
    }
    for p in probs.iter_mut() {
        *p /= sum;
    }
    Ok(probs)
}

fn by_prob_desc(probs: &[f32], a: u32, b: u32) -> Ordering {
    probs[b as usize]
        .total_cmp(&probs[a as usize])
        .then(a.cmp(&b))
}

/// The `k` most probable ids, most probable first, renormalized to sum to 1.
pub fn top_k_candidates(probs: &[f32], k: usize) -> Result<Vec<(u32, f32)>, DecodeError> {
    if k == 0 || k > probs.len() {
        return Err(DecodeError::InvalidConfig(format!(
            "top_k {k} outside 1..={}",
            probs.len()
        )));
    }
    let mut ids: Vec<u32> = (0..probs.len() as u32).collect();
    if k < ids.len() {
        ids.select_nth_unstable_by(k - 1, |&a, &b| by_prob_desc(probs, a, b));
        ids.truncate(k);
    }
    ids.sort_unstable_by(|&a, &b| by_prob_desc(probs, a, b));

    let mass: f32 = ids.iter().map(|&i| probs[i as usize]).sum();
    if !mass.is_finite() || mass <= 0.0 {
        return Err(DecodeError::DegenerateDistribution(format!(
            "top-{k} probability mass {mass}"
        )));
    }
    Ok(ids
        .into_iter()
        .map(|i| (i, probs[i as usize] / mass))
        .collect())
}

/// Draws one id in proportion to its weight by inverting the cumulative
/// distribution. Weights need not sum to exactly 1.
pub fn sample_categorical<R: Rng + ?Sized>(
    candidates: &[(u32, f32)],
    rng: &mut R,
) -> Result<u32, DecodeError> {
    let total: f64 = candidates.iter().map(|&(_, p)| p.max(0.0) as f64).sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(DecodeError::DegenerateDistribution(format!(
            "cannot sample from total weight {total}"
        )));
    }

    let target = rng.gen::<f64>() * total;
    let mut cumsum = 0.0f64;
    let mut last_positive = None;
    for &(id, p) in candidates {
        if p <= 0.0 {
            continue;
        }
        cumsum += p as f64;
        last_positive = Some(id);
        if target < cumsum {
            return Ok(id);
        }
    }
    // Rounding can leave `target` just past the final bucket.
    last_positive.ok_or_else(|| {
        DecodeError::DegenerateDistribution("no candidate with positive weight".to_string())
    })
}

/// Per-step selection policy for one decode call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    temperature: f32,
    top_k: Option<usize>,
}

impl Sampler {
    pub fn new(temperature: f32, top_k: Option<usize>) -> Self {
        Self { temperature, top_k }
    }

    pub fn from_config(cfg: &GenerationConfig) -> Self {
        Self::new(cfg.temperature, cfg.top_k)
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Picks the next id from one position's logits.
    pub fn select<R: Rng + ?Sized>(&self, logits: &[f32], rng: &mut R) -> Result<u32, DecodeError> {
        if self.is_greedy() {
            return argmax(logits);
        }

        let inv = 1.0 / self.temperature;
        let scaled: Vec<f32> = logits.iter().map(|&l| l * inv).collect();
        let probs = softmax(&scaled)?;

        match self.top_k {
            Some(k) => {
                let candidates = top_k_candidates(&probs, k)?;
                sample_categorical(&candidates, rng)
            }
            None => {
                let candidates: Vec<(u32, f32)> = probs
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| (i as u32, p))
                    .collect();
                sample_categorical(&candidates, rng)
            }
        }
    }
}
