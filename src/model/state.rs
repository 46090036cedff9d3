use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor};

/// Hidden state of a stacked GRU: one `(1, hidden_size)` tensor per layer.
///
/// Produced by [`super::Gru::step`] and passed back in on the next call.
#[derive(Debug, Clone)]
pub struct GruState {
    hidden: Vec<Tensor>,
}

impl GruState {
    pub fn zeros(num_layers: usize, hidden_size: usize, device: &Device) -> Result<Self> {
        let mut hidden = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            hidden.push(Tensor::zeros((1, hidden_size), DType::F32, device)?);
        }
        Ok(Self { hidden })
    }

    pub(crate) fn from_layers(hidden: Vec<Tensor>) -> Self {
        Self { hidden }
    }

    pub fn layers(&self) -> &[Tensor] {
        &self.hidden
    }

    pub fn num_layers(&self) -> usize {
        self.hidden.len()
    }

    pub(crate) fn check(&self, num_layers: usize, hidden_size: usize) -> Result<()> {
        if self.hidden.len() != num_layers {
            bail!(
                "GruState layer count mismatch: state has {} layers, model has {}",
                self.hidden.len(),
                num_layers
            );
        }
        for (i, h) in self.hidden.iter().enumerate() {
            if h.dims() != [1, hidden_size] {
                bail!(
                    "GruState layer {i} has shape {:?}, expected [1, {hidden_size}]",
                    h.dims()
                );
            }
        }
        Ok(())
    }

    pub(crate) fn into_layers(self) -> Vec<Tensor> {
        self.hidden
    }
}
