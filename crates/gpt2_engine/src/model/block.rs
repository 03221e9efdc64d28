//! Gpt2Block - pre-norm transformer block (attention + MLP)

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{CausalSelfAttention, LayerNorm, Mlp};
use crate::model::Gpt2Config;

/// Single transformer block with residual connections around attention and MLP
pub struct Gpt2Block {
    pub ln_1: LayerNorm,
    pub attn: CausalSelfAttention,
    pub ln_2: LayerNorm,
    pub mlp: Mlp,
}

impl Gpt2Block {
    pub fn load(cfg: &Gpt2Config, vb: VarBuilder, train: bool) -> Result<Self> {
        let eps = cfg.layer_norm_epsilon;
        let ln_1 = LayerNorm::load(cfg.n_embd, eps, vb.pp("ln_1"))?;
        let attn = CausalSelfAttention::load(cfg, vb.pp("attn"), train)?;
        let ln_2 = LayerNorm::load(cfg.n_embd, eps, vb.pp("ln_2"))?;
        let mlp = Mlp::load(cfg, vb.pp("mlp"), train)?;

        Ok(Self {
            ln_1,
            attn,
            ln_2,
            mlp,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let residual = x;
        let attn_out = self.attn.forward(&self.ln_1.forward(x)?)?;
        let x_mid = (residual + attn_out)?;

        let residual = &x_mid;
        let mlp_out = self.mlp.forward(&self.ln_2.forward(&x_mid)?)?;
        residual + mlp_out
    }
}
