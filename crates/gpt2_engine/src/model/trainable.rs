//! Gpt2Trainable - owned parameter set plus the config that shapes it

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::model::{Gpt2Config, Gpt2LMHeadModel};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// The f32 master copy of every GPT-2 parameter.
///
/// Forward passes run on replicas built by [`Gpt2Trainable::replica`]; those
/// share tensor identity with the master vars (or derive from them through
/// differentiable casts/copies), so gradients always land on the master set.
pub struct Gpt2Trainable {
    config: Gpt2Config,
    varmap: VarMap,
}

impl Gpt2Trainable {
    /// Fresh, randomly initialized parameters on `device`.
    pub fn new(config: Gpt2Config, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        Gpt2LMHeadModel::load(&config, vb, false)?;
        Ok(Self { config, varmap })
    }

    /// Loads `config.json` and `model.safetensors` from a checkpoint directory.
    pub fn from_pretrained<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let config = Gpt2Config::from_json_file(dir.join(CONFIG_FILE))?;
        let mut model = Self::new(config, device)?;
        model.load_weights(dir.join(WEIGHTS_FILE))?;
        Ok(model)
    }

    /// Overwrites the current parameters with a safetensors file.
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .load(path)
            .with_context(|| format!("loading weights from {}", path.display()))?;
        tracing::info!("Loaded weights from {}", path.display());
        Ok(())
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|v| v.elem_count()).sum()
    }

    /// Builds a model view on `device` computing in `dtype`.
    ///
    /// On the master device in f32 the view aliases the vars directly.
    pub fn replica(
        &self,
        device: &Device,
        dtype: DType,
        train: bool,
    ) -> candle_core::Result<Gpt2LMHeadModel> {
        let tensors: HashMap<String, Tensor> = {
            let data = self
                .varmap
                .data()
                .lock()
                .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".into()))?;
            data.iter()
                .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
                .collect()
        };
        let vb = VarBuilder::from_tensors(tensors, dtype, device);
        Gpt2LMHeadModel::load(&self.config, vb, train)
    }

    /// Writes `config.json` and `model.safetensors` into `dir`, which must exist.
    pub fn save_pretrained<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        self.config.to_json_file(dir.join(CONFIG_FILE))?;
        save_securely(&self.varmap, &dir.join(WEIGHTS_FILE))?;
        Ok(())
    }
}

/// Saves under an exclusive lock on a sibling `.lock` file.
fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let lock_path = path.with_extension("lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap
        .save(path)
        .with_context(|| format!("writing {}", path.display()));
    let unlocked = lock_file.unlock();
    drop(lock_file);
    if let Err(e) = std::fs::remove_file(&lock_path) {
        tracing::warn!("Could not remove {}: {}", lock_path.display(), e);
    }
    saved?;
    unlocked?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> Gpt2Config {
        Gpt2Config {
            vocab_size: 16,
            n_ctx: 4,
            n_positions: None,
            n_embd: 8,
            n_layer: 1,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
            initializer_range: 0.02,
            embd_pdrop: 0.0,
            attn_pdrop: 0.0,
            resid_pdrop: 0.0,
        }
    }

    #[test]
    fn save_leaves_no_lock_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = Gpt2Trainable::new(tiny_config(), &Device::Cpu)?;
        model.save_pretrained(dir.path())?;
        assert!(dir.path().join(WEIGHTS_FILE).is_file());
        assert!(!dir.path().join(WEIGHTS_FILE).with_extension("lock").exists());
        Ok(())
    }

    #[test]
    fn failed_save_still_removes_lock_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // A directory where the weights file should go makes the write fail.
        let weights = dir.path().join(WEIGHTS_FILE);
        std::fs::create_dir(&weights)?;
        let model = Gpt2Trainable::new(tiny_config(), &Device::Cpu)?;
        assert!(save_securely(&model.varmap, &weights).is_err());
        assert!(!weights.with_extension("lock").exists());
        Ok(())
    }
}
