//! Step planning and learning-rate schedules.

use clap::ValueEnum;

/// Planned optimizer updates for the whole run.
///
/// Evaluated in f64 left to right and truncated.
pub fn plan_total_steps(
    total_tokens: usize,
    stride: usize,
    epochs: usize,
    batch_size: usize,
    accumulation: usize,
) -> usize {
    let steps =
        total_tokens as f64 / stride as f64 * epochs as f64 / batch_size as f64 / accumulation as f64;
    steps as usize
}

/// Learning rate as a function of the update count.
pub trait LrSchedule: Send {
    /// Advances by one update and returns the new rate.
    fn step(&mut self) -> f64;
    fn learning_rate(&self) -> f64;
    fn current_step(&self) -> usize;
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScheduleKind {
    /// Linear warmup, then linear decay to zero
    #[default]
    Linear,
    /// Linear warmup, then cosine decay to `min_lr`
    Cosine,
}

#[derive(Debug, Clone)]
pub struct WarmupLinear {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl WarmupLinear {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }

    fn factor(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps as f64 - step as f64;
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / span).max(0.0)
    }
}

impl LrSchedule for WarmupLinear {
    fn step(&mut self) -> f64 {
        self.step += 1;
        self.learning_rate()
    }

    fn learning_rate(&self) -> f64 {
        self.base_lr * self.factor(self.step)
    }

    fn current_step(&self) -> usize {
        self.step
    }
}

#[derive(Debug, Clone)]
pub struct WarmupCosine {
    base_lr: f64,
    min_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl WarmupCosine {
    pub fn new(base_lr: f64, min_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }
}

impl LrSchedule for WarmupCosine {
    fn step(&mut self) -> f64 {
        self.step += 1;
        self.learning_rate()
    }

    fn learning_rate(&self) -> f64 {
        if self.step < self.warmup_steps {
            return self.base_lr * (self.step as f64 / self.warmup_steps.max(1) as f64);
        }
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        let progress = ((self.step - self.warmup_steps) as f64 / span).min(1.0);
        let decay = 0.5 * (1.0 + (progress * std::f64::consts::PI).cos());
        self.min_lr + (self.base_lr - self.min_lr) * decay
    }

    fn current_step(&self) -> usize {
        self.step
    }
}

pub fn build_schedule(
    kind: ScheduleKind,
    base_lr: f64,
    min_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
) -> Box<dyn LrSchedule> {
    match kind {
        ScheduleKind::Linear => Box::new(WarmupLinear::new(base_lr, warmup_steps, total_steps)),
        ScheduleKind::Cosine => Box::new(WarmupCosine::new(
            base_lr,
            min_lr,
            warmup_steps,
            total_steps,
        )),
    }
}
