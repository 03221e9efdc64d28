//! One micro-step: forward, backward, accumulate, maybe update.

use candle_core::{DType, Result, Tensor};
use candle_nn::Optimizer;
use gpt2_engine::Gpt2Trainable;

use super::grads::GradAccumulator;
use super::precision::Precision;
use super::schedule::LrSchedule;
use super::strategy::ExecutionStrategy;
use crate::data::Batch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Reduced loss after division by the accumulation factor.
    pub loss: f64,
    /// An update window closed on this micro-step.
    pub updated: bool,
    /// The window closed but the optimizer step was skipped.
    pub skipped: bool,
    pub learning_rate: f64,
    /// Global L2 norm of the accumulated gradients before clipping.
    pub grad_norm: f64,
}

pub struct StepExecutor<O: Optimizer> {
    optimizer: O,
    schedule: Box<dyn LrSchedule>,
    precision: Precision,
    accumulator: GradAccumulator,
    accumulation: usize,
    max_grad_norm: f64,
    strategy: Box<dyn ExecutionStrategy>,
    updates: usize,
}

impl<O: Optimizer> StepExecutor<O> {
    pub fn new(
        model: &Gpt2Trainable,
        mut optimizer: O,
        schedule: Box<dyn LrSchedule>,
        precision: Precision,
        accumulation: usize,
        max_grad_norm: f64,
        strategy: Box<dyn ExecutionStrategy>,
    ) -> Self {
        optimizer.set_learning_rate(schedule.learning_rate());
        Self {
            optimizer,
            schedule,
            precision,
            accumulator: GradAccumulator::new(model.parameters()),
            accumulation: accumulation.max(1),
            max_grad_norm,
            strategy,
            updates: 0,
        }
    }

    pub fn strategy(&self) -> &dyn ExecutionStrategy {
        self.strategy.as_ref()
    }

    pub fn learning_rate(&self) -> f64 {
        self.schedule.learning_rate()
    }

    /// Optimizer steps actually applied.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// `micro_step` is the batch index within the current shard.
    pub fn step(
        &mut self,
        model: &Gpt2Trainable,
        batch: &Batch,
        micro_step: usize,
    ) -> Result<StepOutcome> {
        let losses = self.strategy.forward(model, batch, self.precision.dtype)?;
        let mut loss = match losses.len() {
            0 => candle_core::bail!("empty batch produced no loss"),
            1 => losses[0].clone(),
            _ => Tensor::stack(&losses, 0)?.mean_all()?,
        };
        if self.accumulation > 1 {
            loss = (loss / self.accumulation as f64)?;
        }
        let loss_value = f64::from(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?);

        let scale = self.precision.scaler.scale();
        let grads = (loss * scale)?.backward()?;
        self.accumulator.accumulate(grads, scale)?;
        let grad_norm = self.accumulator.clip_grad_norm(self.max_grad_norm)?;

        let mut outcome = StepOutcome {
            loss: loss_value,
            updated: false,
            skipped: false,
            learning_rate: self.schedule.learning_rate(),
            grad_norm,
        };
        if (micro_step + 1) % self.accumulation != 0 {
            return Ok(outcome);
        }

        let lr = self.schedule.step();
        self.optimizer.set_learning_rate(lr);
        let overflow = self.accumulator.overflowed() || !grad_norm.is_finite();
        if overflow {
            tracing::warn!(
                "Non-finite gradients (norm {}), skipping optimizer step",
                grad_norm
            );
        } else if let Some(grads) = self.accumulator.grads() {
            self.optimizer.step(grads)?;
            self.updates += 1;
        }
        self.precision.scaler.update(overflow);
        self.accumulator.zero_grad();

        outcome.updated = true;
        outcome.skipped = overflow;
        outcome.learning_rate = lr;
        Ok(outcome)
    }
}
