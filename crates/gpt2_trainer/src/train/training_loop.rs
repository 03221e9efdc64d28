//! Training Loop - epoch orchestration over shards

use anyhow::{Context, Result};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use gpt2_engine::device_utils::{get_vram_info, resolve_devices};
use gpt2_engine::{DeviceSelector, Gpt2Config, Gpt2Trainable};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use super::args::{PlanArgs, TrainArgs};
use super::checkpoint::{epoch_dir, final_dir, save_checkpoint};
use super::precision::Precision;
use super::schedule::{build_schedule, plan_total_steps};
use super::step::StepExecutor;
use super::strategy::from_devices;
use crate::data::{self, make_batches, read_shard, sample_windows, shard_path, total_tokens};
use crate::error::TrainError;

/// Where the run currently is; used as error and log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    BuildingShards,
    ComputingTotalSteps,
    TrainingEpoch(usize),
    SavingCheckpoint(usize),
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::BuildingShards => write!(f, "building shards"),
            Stage::ComputingTotalSteps => write!(f, "computing total steps"),
            Stage::TrainingEpoch(e) => write!(f, "training epoch {e}"),
            Stage::SavingCheckpoint(e) => write!(f, "saving checkpoint for epoch {e}"),
            Stage::Done => write!(f, "done"),
        }
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    tracing::debug!("Stage: {} -> {}", stage, next);
    *stage = next;
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub total_tokens: usize,
    pub planned_steps: usize,
    pub optimizer_steps: usize,
    pub checkpoints: Vec<PathBuf>,
}

fn now() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

fn load_model(args: &TrainArgs, device: &candle_core::Device) -> Result<Gpt2Trainable> {
    if let Some(dir) = &args.pretrained_model {
        return Gpt2Trainable::from_pretrained(dir, device)
            .with_context(|| format!("loading pretrained model from {}", dir.display()));
    }
    let config = Gpt2Config::from_json_file(&args.model_config)
        .map_err(|e| TrainError::config(format!("{e:#}")))?;
    Ok(Gpt2Trainable::new(config, device)?)
}

/// Main training function
pub fn run(args: TrainArgs) -> Result<TrainingSummary> {
    let mut stage = Stage::Idle;
    args.validate()?;

    // ============================================================
    // Section 1: Devices, precision, model
    // ============================================================
    let devices = resolve_devices(&args.device);
    let primary = devices[0].clone();
    info!("Devices: {:?}", devices);
    if let DeviceSelector::Cuda(ordinals) = &args.device {
        for &ordinal in ordinals {
            if let Ok((free, total)) = get_vram_info(ordinal) {
                if total > 0 {
                    info!(
                        "💾 GPU {}: {:.0} MB free of {:.0} MB",
                        ordinal,
                        free as f64 / (1024.0 * 1024.0),
                        total as f64 / (1024.0 * 1024.0)
                    );
                }
            }
        }
    }
    let precision = Precision::resolve(args.fp16, args.fp16_opt_level, &primary)?;
    info!(
        "Precision: {:?} (loss scale {})",
        precision.dtype,
        precision.scaler.scale()
    );

    let model = load_model(&args, &primary)?;
    let n_ctx = model.config().n_ctx;
    info!("Config: {:?}", model.config());
    info!(
        "📊 Model Size: {:.2}M Params",
        model.num_parameters() as f64 / 1_000_000.0
    );

    std::fs::create_dir_all(&args.output_dir)
        .map_err(|e| TrainError::io_at("creating output directory", &args.output_dir, e))?;

    // ============================================================
    // Section 2: Shards and step planning
    // ============================================================
    if args.raw {
        enter(&mut stage, Stage::BuildingShards);
        data::run_build_shards(&args.shards).with_context(|| stage.to_string())?;
        info!("Finished building shards");
    }

    enter(&mut stage, Stage::ComputingTotalSteps);
    let shard_dir = &args.shards.tokenized_data_path;
    let num_pieces = args.shards.num_pieces;
    let full_len = total_tokens(shard_dir, num_pieces).with_context(|| stage.to_string())?;
    let total_steps = plan_total_steps(
        full_len,
        args.stride,
        args.epochs,
        args.batch_size,
        args.gradient_accumulation,
    );
    info!("Total tokens: {}, total steps = {}", full_len, total_steps);

    // ============================================================
    // Section 3: Optimizer, schedule, executor
    // ============================================================
    let optimizer = AdamW::new(
        model.parameters(),
        ParamsAdamW {
            lr: args.lr,
            eps: 1e-6,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    let schedule = build_schedule(
        args.schedule,
        args.lr,
        args.min_lr,
        args.warmup_steps,
        total_steps,
    );
    let strategy = from_devices(devices);
    info!(
        "Strategy: {} ({} replicas)",
        strategy.name(),
        strategy.replica_count()
    );
    let mut executor = StepExecutor::new(
        &model,
        optimizer,
        schedule,
        precision,
        args.gradient_accumulation,
        args.max_grad_norm,
        strategy,
    );
    info!("Initial learning rate: {:e}", executor.learning_rate());

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // ============================================================
    // Section 4: Epochs
    // ============================================================
    info!("starting training");
    let mut checkpoints = Vec::new();
    let mut last_loss = None;
    for epoch in 1..=args.epochs {
        enter(&mut stage, Stage::TrainingEpoch(epoch));
        info!("epoch {}", epoch);
        info!("time: {}", chrono::Local::now().to_rfc3339());
        let started = Instant::now();
        let mut skipped = 0usize;

        let mut order: Vec<usize> = (0..num_pieces).collect();
        order.shuffle(&mut rng);

        for (piece_num, &piece) in order.iter().enumerate() {
            let mut running_loss = 0.0;
            let path = shard_path(shard_dir, piece);
            let ids = read_shard(&path).with_context(|| format!("{stage}, shard {piece}"))?;
            let windows = sample_windows(&ids, n_ctx, args.stride, &mut rng);

            for (step, batch) in make_batches(&windows, args.batch_size).enumerate() {
                let outcome = executor
                    .step(&model, &batch, step)
                    .with_context(|| format!("{stage}, shard {piece}, step {step}"))?;
                if outcome.updated {
                    running_loss += outcome.loss;
                    last_loss = Some(outcome.loss);
                }
                if outcome.skipped {
                    skipped += 1;
                }
                if (step + 1) % args.log_step == 0 {
                    info!(
                        "now time: {}. Step {} of piece {} of epoch {}, loss {}, lr {:e}, grad norm {:.4}",
                        now(),
                        (step + 1) / args.gradient_accumulation,
                        piece_num,
                        epoch,
                        running_loss * args.gradient_accumulation as f64 / args.log_step as f64,
                        outcome.learning_rate,
                        outcome.grad_norm
                    );
                    running_loss = 0.0;
                }
            }
        }

        if skipped > 0 {
            warn!(
                "epoch {}: {} optimizer steps skipped on non-finite gradients",
                epoch, skipped
            );
        }

        enter(&mut stage, Stage::SavingCheckpoint(epoch));
        let dir = epoch_dir(&args.output_dir, epoch);
        info!("saving model for epoch {}", epoch);
        save_checkpoint(
            executor.strategy(),
            &model,
            &dir,
            epoch,
            executor.updates(),
            last_loss,
        )
        .with_context(|| stage.to_string())?;
        checkpoints.push(dir);
        info!("epoch {} finished", epoch);
        info!(
            "time for one epoch: {:.1}s",
            started.elapsed().as_secs_f64()
        );
    }

    info!("training finished");
    let dir = final_dir(&args.output_dir);
    save_checkpoint(
        executor.strategy(),
        &model,
        &dir,
        args.epochs,
        executor.updates(),
        last_loss,
    )
    .context("saving final model")?;
    checkpoints.push(dir);
    enter(&mut stage, Stage::Done);

    Ok(TrainingSummary {
        total_tokens: full_len,
        planned_steps: total_steps,
        optimizer_steps: executor.updates(),
        checkpoints,
    })
}

/// Token count and planned optimizer steps for existing shards.
pub fn run_plan(args: &PlanArgs) -> Result<(usize, usize)> {
    if args.stride == 0 || args.batch_size == 0 || args.gradient_accumulation == 0 {
        return Err(TrainError::config(
            "--stride, --batch-size and --gradient-accumulation must be at least 1",
        )
        .into());
    }
    let tokens = total_tokens(&args.tokenized_data_path, args.num_pieces)?;
    let steps = plan_total_steps(
        tokens,
        args.stride,
        args.epochs,
        args.batch_size,
        args.gradient_accumulation,
    );
    info!("Total tokens: {}, total steps = {}", tokens, steps);
    Ok((tokens, steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_read_naturally() {
        assert_eq!(Stage::TrainingEpoch(3).to_string(), "training epoch 3");
        assert_eq!(
            Stage::SavingCheckpoint(1).to_string(),
            "saving checkpoint for epoch 1"
        );
    }

    #[test]
    fn plan_reads_existing_shards() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ids: Vec<u32> = (0..5000).collect();
        data::shards::write_shard(&shard_path(dir.path(), 0), &ids)?;
        data::shards::write_shard(&shard_path(dir.path(), 1), &ids)?;

        let args = PlanArgs {
            tokenized_data_path: dir.path().to_path_buf(),
            num_pieces: 2,
            stride: 768,
            epochs: 5,
            batch_size: 8,
            gradient_accumulation: 1,
        };
        assert_eq!(run_plan(&args)?, (10_000, 8));
        Ok(())
    }
}
