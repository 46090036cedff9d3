use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};

use crate::config::ModelSpec;
use crate::generate::LanguageModel;
use crate::loader::GruWeights;
use crate::model::ops::{linear_2d, GruCell};
use crate::Runtime;

pub mod ops;
pub mod state;

pub use state::GruState;

/// Embedding → stacked GRU → linear head language model.
pub struct Gru {
    spec: ModelSpec,
    device: Device,
    embedding: Tensor,
    cells: Vec<GruCell>,
    head_t: Tensor,
    head_bias: Tensor,
}

impl Gru {
    pub fn new(spec: ModelSpec, w: GruWeights, rt: &Runtime) -> Result<Self> {
        if rt.dtype != DType::F32 {
            bail!("only f32 is supported, got {:?}", rt.dtype);
        }
        if spec.num_layers == 0 {
            bail!("num_layers must be positive");
        }
        if w.layers.len() != spec.num_layers {
            bail!(
                "weights have {} GRU layers, spec has {}",
                w.layers.len(),
                spec.num_layers
            );
        }

        let mut cells = Vec::with_capacity(w.layers.len());
        for (i, l) in w.layers.into_iter().enumerate() {
            let cell = GruCell {
                w_ih_t: l.weight_ih.t()?.contiguous()?,
                w_hh_t: l.weight_hh.t()?.contiguous()?,
                b_ih: l.bias_ih,
                b_hh: l.bias_hh,
                hidden_size: spec.hidden_size,
            };
            cells.push(cell);
            tracing::trace!(layer = i, "prepared GRU layer");
        }
        let head_t = w.linear_weight.t()?.contiguous()?;

        Ok(Self {
            spec,
            device: rt.device.clone(),
            embedding: w.embedding,
            cells,
            head_t,
            head_bias: w.linear_bias,
        })
    }

    pub fn new_state(&self) -> Result<GruState> {
        GruState::zeros(self.spec.num_layers, self.spec.hidden_size, &self.device)
    }

    /// Feeds `input_ids` one at a time through every layer.
    ///
    /// Returns logits `(1, seq_len, vocab_size)` and the hidden state after
    /// the last id.
    pub fn forward(&self, input_ids: &[u32], state: GruState) -> Result<(Tensor, GruState)> {
        let seq_len = input_ids.len();
        if seq_len == 0 {
            bail!("input_ids is empty");
        }
        if let Some(&bad) = input_ids
            .iter()
            .find(|&&id| id as usize >= self.spec.vocab_size)
        {
            bail!("token id {bad} out of range for vocab_size {}", self.spec.vocab_size);
        }
        state.check(self.spec.num_layers, self.spec.hidden_size)?;

        let ids = Tensor::from_vec(input_ids.to_vec(), seq_len, &self.device)
            .context("create input_ids tensor")?;
        let emb = self
            .embedding
            .index_select(&ids, 0)
            .context("embedding index_select")?;

        let mut hidden = state.into_layers();
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let mut x = emb.narrow(0, t, 1).context("slice embedding row")?;
            for (i, cell) in self.cells.iter().enumerate() {
                let h = cell
                    .forward(&x, &hidden[i])
                    .with_context(|| format!("position {t} layer {i} gru cell"))?;
                hidden[i] = h.clone();
                x = h;
            }
            outputs.push(x);
        }

        let top = Tensor::cat(&outputs, 0).context("concat outputs")?;
        let logits = linear_2d(&top, &self.head_t, &self.head_bias)
            .context("output projection")?
            .reshape((1, seq_len, self.spec.vocab_size))?;
        Ok((logits, GruState::from_layers(hidden)))
    }
}

impl LanguageModel for Gru {
    type State = GruState;

    fn vocab_size(&self) -> usize {
        self.spec.vocab_size
    }

    fn step(&self, input_ids: &[u32], state: Option<GruState>) -> Result<(Tensor, GruState)> {
        let state = match state {
            Some(s) => s,
            None => self.new_state()?,
        };
        self.forward(input_ids, state)
    }
}
