//! Mlp - GPT-2 feed-forward block (c_fc -> GELU -> c_proj)

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::{dropout, Conv1D};
use crate::model::Gpt2Config;

pub struct Mlp {
    pub c_fc: Conv1D,
    pub c_proj: Conv1D,
    resid_pdrop: f32,
    train: bool,
}

impl Mlp {
    pub fn load(cfg: &Gpt2Config, vb: VarBuilder, train: bool) -> Result<Self> {
        let inner = 4 * cfg.n_embd;
        let c_fc = Conv1D::load(cfg.n_embd, inner, cfg.initializer_range, vb.pp("c_fc"))?;
        let c_proj = Conv1D::load(inner, cfg.n_embd, cfg.initializer_range, vb.pp("c_proj"))?;
        Ok(Self {
            c_fc,
            c_proj,
            resid_pdrop: cfg.resid_pdrop,
            train,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // gelu() is the tanh approximation GPT-2 was trained with.
        let hidden = self.c_fc.forward(x)?.gelu()?;
        let out = self.c_proj.forward(&hidden)?;
        dropout(&out, self.resid_pdrop, self.train)
    }
}
