use anyhow::{bail, Result};
use candle_core::Tensor;
use candle_nn::ops::sigmoid;

/// `x @ weight_t + bias` for `x: (n, in)`, `weight_t: (in, out)`, `bias: (out)`.
pub fn linear_2d(x: &Tensor, weight_t: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let (_, in_dim) = x.dims2()?;
    let (w_in, w_out) = weight_t.dims2()?;
    if w_in != in_dim {
        bail!("linear_2d weight in_dim mismatch: x {in_dim} vs w {w_in}");
    }
    let bshape = bias.dims();
    if bshape != [w_out] {
        bail!(
            "linear_2d bias shape mismatch: expected [{w_out}] got {:?}",
            bshape
        );
    }
    x.matmul(weight_t)?.broadcast_add(bias).map_err(Into::into)
}

/// Transposed, ready-to-multiply parameters of one GRU layer.
#[derive(Debug, Clone)]
pub struct GruCell {
    pub w_ih_t: Tensor,
    pub w_hh_t: Tensor,
    pub b_ih: Tensor,
    pub b_hh: Tensor,
    pub hidden_size: usize,
}

impl GruCell {
    /// One GRU update with PyTorch gate order (reset, update, new).
    pub fn forward(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let hs = self.hidden_size;
        let gi = linear_2d(x, &self.w_ih_t, &self.b_ih)?;
        let gh = linear_2d(h, &self.w_hh_t, &self.b_hh)?;

        let r = sigmoid(&gi.narrow(1, 0, hs)?.add(&gh.narrow(1, 0, hs)?)?)?;
        let z = sigmoid(&gi.narrow(1, hs, hs)?.add(&gh.narrow(1, hs, hs)?)?)?;
        let n = gi
            .narrow(1, 2 * hs, hs)?
            .add(&r.mul(&gh.narrow(1, 2 * hs, hs)?)?)?
            .tanh()?;

        // h' = (1 - z) * n + z * h == n + z * (h - n)
        let delta = z.mul(&h.sub(&n)?)?;
        n.add(&delta).map_err(Into::into)
    }
}
