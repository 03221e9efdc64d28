//! Checkpoint Management - per-epoch and final model snapshots

use anyhow::{Context, Result};
use gpt2_engine::Gpt2Trainable;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::strategy::ExecutionStrategy;
use crate::error::TrainError;

pub const STATE_FILE: &str = "training_state.json";

/// Metadata written next to the weights.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// 1-based epoch the snapshot was taken after.
    pub epoch: usize,
    pub optimizer_steps: usize,
    pub loss: Option<f64>,
    pub date: String,
}

pub fn epoch_dir(output_dir: &Path, epoch: usize) -> PathBuf {
    output_dir.join(format!("model_epoch{epoch}"))
}

pub fn final_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("final_model")
}

/// Creates `dir`, saves the model through `strategy` and writes the state file.
pub fn save_checkpoint(
    strategy: &dyn ExecutionStrategy,
    model: &Gpt2Trainable,
    dir: &Path,
    epoch: usize,
    optimizer_steps: usize,
    loss: Option<f64>,
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| TrainError::io_at("creating checkpoint directory", dir, e))?;
    strategy
        .save_checkpoint(model, dir)
        .with_context(|| format!("saving model to {}", dir.display()))?;

    let state = TrainingState {
        epoch,
        optimizer_steps,
        loss,
        date: chrono::Local::now().to_rfc3339(),
    };
    let path = dir.join(STATE_FILE);
    let file = File::create(&path).map_err(|e| TrainError::io_at("writing", &path, e))?;
    serde_json::to_writer_pretty(file, &state)
        .with_context(|| format!("serializing {}", path.display()))?;
    tracing::info!("💾 Checkpoint saved to {}", dir.display());
    Ok(())
}

pub fn load_training_state(dir: &Path) -> Result<TrainingState> {
    let path = dir.join(STATE_FILE);
    let file = File::open(&path).map_err(|e| TrainError::io_at("reading", &path, e))?;
    let state = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| TrainError::data(format!("{}", path.display()), e.to_string()))?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::strategy::SingleDevice;
    use candle_core::Device;
    use gpt2_engine::Gpt2Config;

    #[test]
    fn writes_weights_config_and_state() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let config = Gpt2Config {
            vocab_size: 16,
            n_ctx: 4,
            n_positions: None,
            n_embd: 8,
            n_layer: 1,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
            initializer_range: 0.02,
            embd_pdrop: 0.1,
            attn_pdrop: 0.1,
            resid_pdrop: 0.1,
        };
        let model = Gpt2Trainable::new(config, &Device::Cpu)?;
        let strategy = SingleDevice::new(Device::Cpu);

        let dir = epoch_dir(out.path(), 2);
        save_checkpoint(&strategy, &model, &dir, 2, 17, Some(3.5))?;

        assert!(dir.ends_with("model_epoch2"));
        assert!(dir.join("config.json").exists());
        assert!(dir.join("model.safetensors").exists());
        let state = load_training_state(&dir)?;
        assert_eq!((state.epoch, state.optimizer_steps), (2, 17));
        assert_eq!(state.loss, Some(3.5));
        Ok(())
    }

    #[test]
    fn unwritable_output_is_an_io_error() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let blocker = out.path().join("model");
        std::fs::write(&blocker, "not a directory")?;
        let model = Gpt2Trainable::new(
            Gpt2Config {
                vocab_size: 8,
                n_ctx: 2,
                n_positions: None,
                n_embd: 4,
                n_layer: 1,
                n_head: 1,
                layer_norm_epsilon: 1e-5,
                initializer_range: 0.02,
                embd_pdrop: 0.0,
                attn_pdrop: 0.0,
                resid_pdrop: 0.0,
            },
            &Device::Cpu,
        )?;
        let err = save_checkpoint(
            &SingleDevice::new(Device::Cpu),
            &model,
            &final_dir(&blocker),
            1,
            0,
            None,
        )
        .expect_err("directory creation must fail");
        assert!(matches!(
            err.downcast_ref::<TrainError>(),
            Some(TrainError::Io { .. })
        ));
        Ok(())
    }
}
