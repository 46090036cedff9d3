#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use gru_decode::{LanguageModel, TextTokenizer};

/// Model whose scores depend only on the current input id.
///
/// Its state is the number of steps taken so far, which lets tests check
/// that the decoder hands back exactly the state it was given.
pub struct LookupModel {
    rows: Vec<Vec<f32>>,
    /// Prepend a decoy position that must never be read.
    pub decoy_position: bool,
    /// Fail on this (1-based) call.
    pub fail_on_call: Option<usize>,
    pub calls: Cell<usize>,
    pub inputs: RefCell<Vec<u32>>,
    pub states_seen: RefCell<Vec<Option<usize>>>,
}

impl LookupModel {
    pub fn new(rows: Vec<Vec<f32>>) -> Self {
        Self {
            rows,
            decoy_position: false,
            fail_on_call: None,
            calls: Cell::new(0),
            inputs: RefCell::new(Vec::new()),
            states_seen: RefCell::new(Vec::new()),
        }
    }

    /// One-hot style rows: input `i` scores `next(i)` highest.
    pub fn peaked(vocab: usize, next: impl Fn(usize) -> usize) -> Self {
        let rows = (0..vocab)
            .map(|i| {
                let mut row = vec![0.0f32; vocab];
                row[next(i)] = 10.0;
                row
            })
            .collect();
        Self::new(rows)
    }

    pub fn row(&self, id: u32) -> &[f32] {
        &self.rows[id as usize]
    }
}

impl LanguageModel for LookupModel {
    type State = usize;

    fn vocab_size(&self) -> usize {
        self.rows[0].len()
    }

    fn step(&self, input_ids: &[u32], state: Option<usize>) -> Result<(Tensor, usize)> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        self.states_seen.borrow_mut().push(state);
        if self.fail_on_call == Some(call) {
            bail!("lookup model failure on call {call}");
        }
        if input_ids.len() != 1 {
            bail!("expected exactly one input id, got {input_ids:?}");
        }
        let id = input_ids[0];
        self.inputs.borrow_mut().push(id);

        let v = self.vocab_size();
        let mut data = Vec::with_capacity(2 * v);
        let positions = if self.decoy_position {
            // decoy favors id 0 overwhelmingly
            data.push(1e6f32);
            data.extend(std::iter::repeat(0.0f32).take(v - 1));
            2
        } else {
            1
        };
        data.extend_from_slice(&self.rows[id as usize]);
        let logits = Tensor::from_vec(data, (1, positions, v), &Device::Cpu)?;
        Ok((logits, state.unwrap_or(0) + 1))
    }
}

/// Tokenizer rendering each id as its decimal digits.
pub struct DigitTokenizer {
    pub bos: u32,
    pub eos: u32,
    pub fail_decode: bool,
}

impl DigitTokenizer {
    pub fn new(bos: u32, eos: u32) -> Self {
        Self {
            bos,
            eos,
            fail_decode: false,
        }
    }
}

impl TextTokenizer for DigitTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => Ok(d),
                None => bail!("not a digit: {c:?}"),
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        if self.fail_decode {
            bail!("digit tokenizer failure");
        }
        Ok(ids.iter().map(|id| id.to_string()).collect())
    }

    fn bos_token_id(&self) -> u32 {
        self.bos
    }

    fn eos_token_id(&self) -> u32 {
        self.eos
    }
}
