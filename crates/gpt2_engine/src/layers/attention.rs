use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::VarBuilder;

use super::{dropout, Conv1D};
use crate::model::Gpt2Config;

/// Masked multi-head self-attention with a fused `c_attn` QKV projection.
pub struct CausalSelfAttention {
    pub c_attn: Conv1D,
    pub c_proj: Conv1D,
    pub n_head: usize,
    pub head_dim: usize,
    pub scaling: f64,
    attn_pdrop: f32,
    resid_pdrop: f32,
    train: bool,
}

/// Upper-triangular mask: 1 where position `j` lies in the future of `i`.
fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<u8> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (seq_len, seq_len), device)
}

impl CausalSelfAttention {
    pub fn load(cfg: &Gpt2Config, vb: VarBuilder, train: bool) -> Result<Self> {
        let n_embd = cfg.n_embd;
        let head_dim = cfg.head_dim();
        let c_attn = Conv1D::load(n_embd, 3 * n_embd, cfg.initializer_range, vb.pp("c_attn"))?;
        let c_proj = Conv1D::load(n_embd, n_embd, cfg.initializer_range, vb.pp("c_proj"))?;
        Ok(Self {
            c_attn,
            c_proj,
            n_head: cfg.n_head,
            head_dim,
            scaling: 1.0 / (head_dim as f64).sqrt(),
            attn_pdrop: cfg.attn_pdrop,
            resid_pdrop: cfg.resid_pdrop,
            train,
        })
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq_len: usize) -> Result<Tensor> {
        x.reshape((batch, seq_len, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Input/output shape: [batch, seq, n_embd]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, n_embd) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;
        let q = self.split_heads(&qkv.narrow(D::Minus1, 0, n_embd)?, batch, seq_len)?;
        let k = self.split_heads(&qkv.narrow(D::Minus1, n_embd, n_embd)?, batch, seq_len)?;
        let v = self.split_heads(&qkv.narrow(D::Minus1, 2 * n_embd, n_embd)?, batch, seq_len)?;

        let scores = (q.matmul(&k.t()?)? * self.scaling)?;
        let mask = causal_mask(seq_len, x.device())?.broadcast_as(scores.shape())?;
        let neg_inf = Tensor::new(f32::NEG_INFINITY, x.device())?
            .to_dtype(scores.dtype())?
            .broadcast_as(scores.shape())?;
        let scores = mask.where_cond(&neg_inf, &scores)?;

        // Softmax in f32 regardless of the compute dtype.
        let probs = candle_nn::ops::softmax(&scores.to_dtype(DType::F32)?, D::Minus1)?
            .to_dtype(v.dtype())?;
        let probs = dropout(&probs, self.attn_pdrop, self.train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, n_embd))?;
        let out = self.c_proj.forward(&context)?;
        dropout(&out, self.resid_pdrop, self.train)
    }
}
