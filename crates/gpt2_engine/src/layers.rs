//! Layers Module - GPT-2 building blocks
//!
//! - Conv1D: GPT-2's transposed linear projection (`x @ W + b`)
//! - LayerNorm: affine layer normalization computed in f32
//! - CausalSelfAttention: masked multi-head attention
//! - Mlp: GELU feed-forward block

use candle_core::{Result, Tensor};

pub mod attention;
pub mod conv1d;
pub mod layer_norm;
pub mod mlp;

pub use attention::CausalSelfAttention;
pub use conv1d::Conv1D;
pub use layer_norm::LayerNorm;
pub use mlp::Mlp;

/// Dropout that is a no-op outside training or when the rate is zero.
pub(crate) fn dropout(x: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(x, p)
    } else {
        Ok(x.clone())
    }
}
