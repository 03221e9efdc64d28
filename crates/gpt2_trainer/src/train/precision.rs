//! Mixed precision: compute dtype plus loss scaling.

use candle_core::{DType, Device};
use clap::ValueEnum;

use crate::error::{Result, TrainError};

/// Mixed-precision level, named after the apex opt levels.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// f32 everywhere.
    #[value(name = "O0")]
    O0,
    /// f16 compute, f32 master weights, dynamic loss scale.
    #[default]
    #[value(name = "O1")]
    O1,
    /// Same numerics as O1 here.
    #[value(name = "O2")]
    O2,
    /// f16 compute with a fixed loss scale of 1.
    #[value(name = "O3")]
    O3,
}

const INITIAL_DYNAMIC_SCALE: f64 = 65536.0;
const GROWTH_INTERVAL: usize = 2000;

/// Multiplier applied to the loss before backward.
#[derive(Debug, Clone, PartialEq)]
pub struct LossScaler {
    scale: f64,
    dynamic: bool,
    clean_steps: usize,
}

impl LossScaler {
    pub fn fixed(scale: f64) -> Self {
        Self {
            scale,
            dynamic: false,
            clean_steps: 0,
        }
    }

    pub fn dynamic() -> Self {
        Self {
            scale: INITIAL_DYNAMIC_SCALE,
            dynamic: true,
            clean_steps: 0,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Called once per update window.
    pub fn update(&mut self, overflow: bool) {
        if !self.dynamic {
            return;
        }
        if overflow {
            self.scale = (self.scale * 0.5).max(1.0);
            self.clean_steps = 0;
            tracing::warn!("Gradient overflow, loss scale reduced to {}", self.scale);
        } else {
            self.clean_steps += 1;
            if self.clean_steps >= GROWTH_INTERVAL {
                self.scale *= 2.0;
                self.clean_steps = 0;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Precision {
    pub dtype: DType,
    pub scaler: LossScaler,
}

impl Precision {
    pub fn full() -> Self {
        Self {
            dtype: DType::F32,
            scaler: LossScaler::fixed(1.0),
        }
    }

    /// Fails when half precision is requested on a device without CUDA.
    pub fn resolve(fp16: bool, level: OptLevel, primary: &Device) -> Result<Self> {
        if !fp16 {
            return Ok(Self::full());
        }
        if !primary.is_cuda() {
            return Err(TrainError::config(
                "--fp16 requires a CUDA device (build with --features cuda and select a GPU)",
            ));
        }
        Ok(match level {
            OptLevel::O0 => Self::full(),
            OptLevel::O1 | OptLevel::O2 => Self {
                dtype: DType::F16,
                scaler: LossScaler::dynamic(),
            },
            OptLevel::O3 => Self {
                dtype: DType::F16,
                scaler: LossScaler::fixed(1.0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fp16_on_cpu_is_rejected() {
        let result = Precision::resolve(true, OptLevel::O1, &Device::Cpu);
        assert!(matches!(result, Err(TrainError::Configuration(_))));
    }

    #[test]
    fn without_fp16_every_level_is_f32() -> anyhow::Result<()> {
        for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3] {
            let precision = Precision::resolve(false, level, &Device::Cpu)?;
            assert_eq!(precision, Precision::full());
        }
        Ok(())
    }

    #[test]
    fn dynamic_scale_halves_and_grows() {
        let mut scaler = LossScaler::dynamic();
        scaler.update(true);
        assert_eq!(scaler.scale(), 32768.0);
        for _ in 0..GROWTH_INTERVAL - 1 {
            scaler.update(false);
        }
        assert_eq!(scaler.scale(), 32768.0);
        scaler.update(false);
        assert_eq!(scaler.scale(), 65536.0);
    }

    #[test]
    fn fixed_scale_never_moves() {
        let mut scaler = LossScaler::fixed(1.0);
        scaler.update(true);
        scaler.update(false);
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(OptLevel::from_str("O3", false), Ok(OptLevel::O3));
    }
}
