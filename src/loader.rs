use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use memmap2::Mmap;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use tracing::debug;

use crate::{config::ModelSpec, Runtime};

const EMBEDDING_KEY: &str = "embedding.weight";

/// Prefix shared by every tensor name, e.g. `model.` for checkpoints saved
/// from a wrapping module.
#[derive(Debug, Clone)]
struct KeyResolver {
    prefix: String,
}

impl KeyResolver {
    fn infer(st: &SafeTensors<'_>) -> Result<Self> {
        if st.tensor(EMBEDDING_KEY).is_ok() {
            return Ok(Self {
                prefix: String::new(),
            });
        }
        let names = st.names();
        if let Some(name) = names.iter().find(|n| n.as_str().ends_with(EMBEDDING_KEY)) {
            let prefix = name.as_str().trim_end_matches(EMBEDDING_KEY).to_string();
            return Ok(Self { prefix });
        }

        bail!(
            "could not find a tensor named {EMBEDDING_KEY} (or ending with it). Sample keys: {:?}",
            sample_keys(st)
        );
    }

    fn resolve(&self, base: &str) -> String {
        format!("{}{}", self.prefix, base)
    }
}

#[derive(Debug, Clone)]
pub struct GruLayerWeights {
    /// `(3 * hidden, in)`, gates stacked as reset, update, new.
    pub weight_ih: Tensor,
    /// `(3 * hidden, hidden)`
    pub weight_hh: Tensor,
    pub bias_ih: Tensor,
    pub bias_hh: Tensor,
}

#[derive(Debug, Clone)]
pub struct GruWeights {
    pub embedding: Tensor,
    pub layers: Vec<GruLayerWeights>,
    pub linear_weight: Tensor,
    pub linear_bias: Tensor,
}

pub fn load_gru_weights(model_dir: &Path, spec: &ModelSpec, rt: &Runtime) -> Result<GruWeights> {
    if rt.dtype != DType::F32 {
        bail!("only f32 is supported, got {:?}", rt.dtype);
    }

    let file = find_single_safetensors(model_dir)?;
    let f = std::fs::File::open(&file).with_context(|| format!("open {file:?}"))?;
    let mmap = unsafe { Mmap::map(&f).with_context(|| format!("mmap {file:?}"))? };
    let st = SafeTensors::deserialize(&mmap).context("deserialize safetensors")?;
    let ks = KeyResolver::infer(&st).context("infer safetensors key prefix")?;
    debug!(file = ?file, prefix = %ks.prefix, "loading GRU weights");

    let (v, e, h) = (spec.vocab_size, spec.embedding_dim(), spec.hidden_size);
    let embedding = get_f32(&st, &ks, EMBEDDING_KEY, &[v, e], &rt.device)?;

    let mut layers = Vec::with_capacity(spec.num_layers);
    for i in 0..spec.num_layers {
        let in_dim = if i == 0 { e } else { h };
        layers.push(GruLayerWeights {
            weight_ih: get_f32(&st, &ks, &format!("rnn.weight_ih_l{i}"), &[3 * h, in_dim], &rt.device)?,
            weight_hh: get_f32(&st, &ks, &format!("rnn.weight_hh_l{i}"), &[3 * h, h], &rt.device)?,
            bias_ih: get_f32(&st, &ks, &format!("rnn.bias_ih_l{i}"), &[3 * h], &rt.device)?,
            bias_hh: get_f32(&st, &ks, &format!("rnn.bias_hh_l{i}"), &[3 * h], &rt.device)?,
        });
    }

    let linear_weight = get_f32(&st, &ks, "linear.weight", &[v, h], &rt.device)?;
    let linear_bias = get_f32(&st, &ks, "linear.bias", &[v], &rt.device)?;

    Ok(GruWeights {
        embedding,
        layers,
        linear_weight,
        linear_bias,
    })
}

fn sample_keys(st: &SafeTensors<'_>) -> Vec<String> {
    let mut sample = st
        .names()
        .into_iter()
        .take(50)
        .map(|s| s.as_str().to_string())
        .collect::<Vec<_>>();
    sample.sort();
    sample
}

fn find_single_safetensors(model_dir: &Path) -> Result<PathBuf> {
    let candidate = model_dir.join("model.safetensors");
    if candidate.exists() {
        return Ok(candidate);
    }
    let mut found = vec![];
    for entry in std::fs::read_dir(model_dir).with_context(|| format!("read_dir {model_dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("safetensors") {
            found.push(path);
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => bail!("no .safetensors found under {model_dir:?} (expected model.safetensors)"),
        _ => bail!("multiple .safetensors found under {model_dir:?}, expected a single file"),
    }
}

fn get_f32(
    st: &SafeTensors<'_>,
    ks: &KeyResolver,
    base: &str,
    shape: &[usize],
    device: &Device,
) -> Result<Tensor> {
    let name = ks.resolve(base);
    let t = st.tensor(&name).with_context(|| {
        format!(
            "missing tensor {name} (from base {base}). Sample keys: {:?}",
            sample_keys(st)
        )
    })?;
    tensor_view_to_candle_f32(&t, &name, shape, device)
}

fn tensor_view_to_candle_f32(
    t: &TensorView<'_>,
    name: &str,
    expected: &[usize],
    device: &Device,
) -> Result<Tensor> {
    if t.dtype() != Dtype::F32 {
        bail!("tensor {name} has dtype {:?}, expected f32", t.dtype());
    }
    let actual = t.shape();
    if actual != expected {
        bail!("tensor {name} has shape {actual:?}, expected {expected:?}");
    }
    let bytes = t.data();
    if bytes.len() % 4 != 0 {
        bail!(
            "tensor {name} has invalid byte length {} for f32 data",
            bytes.len()
        );
    }
    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Tensor::from_vec(data, expected, device).with_context(|| format!("create candle tensor {name}"))
}
