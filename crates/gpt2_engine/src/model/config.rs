//! Gpt2Config - Model configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

fn default_initializer_range() -> f64 {
    0.02
}

fn default_pdrop() -> f32 {
    0.1
}

/// GPT-2 architecture configuration, read from the same JSON layout the
/// Hugging Face `GPT2Config` uses.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    /// Training context length (window width).
    pub n_ctx: usize,
    /// Size of the learned position table. Falls back to `n_ctx`.
    #[serde(default)]
    pub n_positions: Option<usize>,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
    #[serde(default = "default_pdrop")]
    pub embd_pdrop: f32,
    #[serde(default = "default_pdrop")]
    pub attn_pdrop: f32,
    #[serde(default = "default_pdrop")]
    pub resid_pdrop: f32,
}

impl Gpt2Config {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading model config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing model config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn n_positions(&self) -> usize {
        self.n_positions.unwrap_or(self.n_ctx)
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Rejects shapes the model cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.n_embd == 0 || self.n_layer == 0 || self.n_head == 0 {
            anyhow::bail!("vocab_size, n_embd, n_layer and n_head must be non-zero");
        }
        if self.n_ctx < 2 {
            anyhow::bail!("n_ctx must be at least 2 (got {})", self.n_ctx);
        }
        if self.n_embd % self.n_head != 0 {
            anyhow::bail!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd,
                self.n_head
            );
        }
        if self.n_ctx > self.n_positions() {
            anyhow::bail!(
                "n_ctx ({}) exceeds n_positions ({})",
                self.n_ctx,
                self.n_positions()
            );
        }
        Ok(())
    }

    /// Closed-form parameter count for the tied-head layout.
    pub fn estimate_parameters(&self) -> usize {
        let embeddings = (self.vocab_size + self.n_positions()) * self.n_embd;
        let per_layer = 12 * self.n_embd * self.n_embd + 13 * self.n_embd;
        embeddings + self.n_layer * per_layer + 2 * self.n_embd
    }
}
