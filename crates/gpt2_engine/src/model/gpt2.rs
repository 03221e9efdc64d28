//! Gpt2LMHeadModel - full model with embeddings, blocks and tied LM head

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Embedding, Init, VarBuilder};

use crate::layers::{dropout, LayerNorm};
use crate::lm::CausalLm;
use crate::model::{Gpt2Block, Gpt2Config};

pub struct Gpt2LMHeadModel {
    pub wte: Embedding,
    pub wpe: Embedding,
    pub blocks: Vec<Gpt2Block>,
    pub ln_f: LayerNorm,
    pub config: Gpt2Config,
    train: bool,
}

impl Gpt2LMHeadModel {
    /// Builds the module tree from `vb`.
    ///
    /// With a `VarMap`-backed builder this creates the parameters; with a
    /// tensor-map builder it wraps existing ones (possibly cast or moved).
    pub fn load(cfg: &Gpt2Config, vb: VarBuilder, train: bool) -> Result<Self> {
        let vb_t = vb.pp("transformer");
        let init = Init::Randn {
            mean: 0.0,
            stdev: cfg.initializer_range,
        };
        let wte_w = vb_t
            .pp("wte")
            .get_with_hints((cfg.vocab_size, cfg.n_embd), "weight", init)?;
        let wpe_w = vb_t
            .pp("wpe")
            .get_with_hints((cfg.n_positions(), cfg.n_embd), "weight", init)?;

        let mut blocks = Vec::with_capacity(cfg.n_layer);
        for i in 0..cfg.n_layer {
            blocks.push(Gpt2Block::load(cfg, vb_t.pp(format!("h.{i}")), train)?);
        }
        let ln_f = LayerNorm::load(cfg.n_embd, cfg.layer_norm_epsilon, vb_t.pp("ln_f"))?;

        Ok(Self {
            wte: Embedding::new(wte_w, cfg.n_embd),
            wpe: Embedding::new(wpe_w, cfg.n_embd),
            blocks,
            ln_f,
            config: cfg.clone(),
            train,
        })
    }

    /// `[batch, seq]` ids -> `[batch, seq, vocab]` logits.
    pub fn logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        use candle_core::Module;

        let (_batch, seq_len) = input_ids.dims2()?;
        if seq_len > self.config.n_positions() {
            candle_core::bail!(
                "sequence length {seq_len} exceeds n_positions {}",
                self.config.n_positions()
            );
        }
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let tok = self.wte.forward(input_ids)?;
        let pos = self.wpe.forward(&positions)?;
        let mut h = dropout(&tok.broadcast_add(&pos)?, self.config.embd_pdrop, self.train)?;

        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        let h = self.ln_f.forward(&h)?;
        // LM head shares the token embedding matrix.
        h.broadcast_matmul(&self.wte.embeddings().t()?)
    }
}

impl CausalLm for Gpt2LMHeadModel {
    fn forward(&self, input_ids: &Tensor, labels: &Tensor) -> Result<(Tensor, Tensor)> {
        let logits = self.logits(input_ids)?;
        let (batch, seq_len, vocab) = logits.dims3()?;
        if seq_len < 2 {
            candle_core::bail!("need at least two positions to compute an LM loss");
        }
        let shift_logits = logits
            .narrow(1, 0, seq_len - 1)?
            .reshape((batch * (seq_len - 1), vocab))?
            .to_dtype(DType::F32)?;
        let shift_labels = labels
            .narrow(D::Minus1, 1, seq_len - 1)?
            .reshape(batch * (seq_len - 1))?;
        let loss = candle_nn::loss::cross_entropy(&shift_logits, &shift_labels)?;
        Ok((loss, logits))
    }
}
