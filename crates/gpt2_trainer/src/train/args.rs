//! Training Arguments - CLI configuration for training

use clap::Args;
use gpt2_engine::DeviceSelector;
use std::path::PathBuf;

use super::precision::OptLevel;
use super::schedule::ScheduleKind;
use crate::data::ShardArgs;
use crate::error::{Result, TrainError};

/// Training configuration from command line arguments
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// CUDA ordinals to train on, comma separated, or `cpu`
    #[arg(long, default_value = "0,1,2,3")]
    pub device: DeviceSelector,

    /// GPT-2 model config (JSON)
    #[arg(long, default_value = "config/model_config_small.json")]
    pub model_config: PathBuf,

    #[command(flatten)]
    pub shards: ShardArgs,

    /// Tokenize the raw corpus into shards before training
    #[arg(long, action)]
    pub raw: bool,

    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1.5e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 2000)]
    pub warmup_steps: usize,

    /// Log every N micro-steps
    #[arg(long, default_value_t = 1)]
    pub log_step: usize,

    /// Offset between consecutive training windows
    #[arg(long, default_value_t = 768)]
    pub stride: usize,

    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation: usize,

    /// Mixed-precision training (CUDA only)
    #[arg(long, action)]
    pub fp16: bool,

    #[arg(long, value_enum, default_value_t = OptLevel::O1)]
    pub fp16_opt_level: OptLevel,

    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value = "model/")]
    pub output_dir: PathBuf,

    /// Start from a saved checkpoint directory instead of random weights
    #[arg(long)]
    pub pretrained_model: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ScheduleKind::Linear)]
    pub schedule: ScheduleKind,

    /// Floor of the cosine schedule
    #[arg(long, default_value_t = 0.0)]
    pub min_lr: f64,

    /// Seed for shard order and window shuffling
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    /// Rejects values that would stall or divide by zero.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("--batch-size", self.batch_size),
            ("--stride", self.stride),
            ("--gradient-accumulation", self.gradient_accumulation),
            ("--log-step", self.log_step),
            ("--num-pieces", self.shards.num_pieces),
        ];
        for (flag, value) in positive {
            if value == 0 {
                return Err(TrainError::config(format!("{flag} must be at least 1")));
            }
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainError::config(format!(
                "--lr must be a positive number (got {})",
                self.lr
            )));
        }
        if !(self.max_grad_norm.is_finite() && self.max_grad_norm > 0.0) {
            return Err(TrainError::config(format!(
                "--max-grad-norm must be positive (got {})",
                self.max_grad_norm
            )));
        }
        Ok(())
    }
}

/// Arguments for estimating the schedule of an existing shard set.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[arg(long, default_value = "data/tokenized")]
    pub tokenized_data_path: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub num_pieces: usize,

    #[arg(long, default_value_t = 768)]
    pub stride: usize,

    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: TrainArgs,
    }

    #[test]
    fn defaults_cover_a_full_run() -> anyhow::Result<()> {
        let args = Harness::try_parse_from(["train"])?.args;
        assert_eq!(args.device, DeviceSelector::Cuda(vec![0, 1, 2, 3]));
        assert_eq!(args.epochs, 5);
        assert_eq!(args.batch_size, 8);
        assert_eq!(args.stride, 768);
        assert_eq!(args.warmup_steps, 2000);
        assert_eq!(args.shards.num_pieces, 100);
        assert_eq!(args.fp16_opt_level, OptLevel::O1);
        assert_eq!(args.schedule, ScheduleKind::Linear);
        assert_eq!(args.shards.start_token, "[MASK]");
        assert!(!args.raw && !args.fp16);
        args.validate()?;
        Ok(())
    }

    #[test]
    fn zero_stride_is_rejected() -> anyhow::Result<()> {
        let args = Harness::try_parse_from(["train", "--stride", "0", "--device", "cpu"])?.args;
        assert_eq!(args.device, DeviceSelector::Cpu);
        assert!(matches!(
            args.validate(),
            Err(TrainError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn opt_level_and_schedule_flags_parse() -> anyhow::Result<()> {
        let args = Harness::try_parse_from([
            "train",
            "--fp16",
            "--fp16-opt-level",
            "O3",
            "--schedule",
            "cosine",
        ])?
        .args;
        assert!(args.fp16);
        assert_eq!(args.fp16_opt_level, OptLevel::O3);
        assert_eq!(args.schedule, ScheduleKind::Cosine);
        Ok(())
    }
}
