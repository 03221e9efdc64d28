//! Causal language-model contract used by the training loop.

use candle_core::{Result, Tensor};

/// A model that predicts the next token.
///
/// `labels` carry the same ids as `input_ids`; implementations shift them
/// internally so position `t` is scored against token `t + 1`.
pub trait CausalLm {
    /// Returns `(loss, logits)`: a scalar mean cross-entropy and the
    /// `[batch, seq, vocab]` logits it was computed from.
    fn forward(&self, input_ids: &Tensor, labels: &Tensor) -> Result<(Tensor, Tensor)>;
}
