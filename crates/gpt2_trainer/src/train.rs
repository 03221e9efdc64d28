//! Train Module - Training pipeline for GPT-2
//!
//! - TrainArgs / PlanArgs: CLI arguments
//! - schedule: step planning and learning-rate schedules
//! - precision: compute dtype and loss scaling
//! - grads / step: gradient accumulation and the per-batch executor
//! - strategy: single-device and data-parallel execution
//! - checkpoint: per-epoch and final snapshots
//! - training_loop: epoch orchestration

pub mod args;
pub mod checkpoint;
pub mod grads;
pub mod precision;
pub mod schedule;
pub mod step;
pub mod strategy;
pub mod training_loop;

pub use args::{PlanArgs, TrainArgs};
pub use step::{StepExecutor, StepOutcome};
pub use strategy::ExecutionStrategy;
pub use training_loop::{run, run_plan, Stage, TrainingSummary};
