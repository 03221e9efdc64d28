//! Gradient accumulation across micro-steps.

use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};

/// Sum of unscaled gradients for a fixed parameter set.
pub struct GradAccumulator {
    params: Vec<Var>,
    grads: Option<GradStore>,
    overflow: bool,
}

fn sum_squares(grad: &Tensor) -> Result<f64> {
    let sq = grad
        .to_dtype(DType::F32)?
        .sqr()?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(f64::from(sq))
}

impl GradAccumulator {
    pub fn new(params: Vec<Var>) -> Self {
        Self {
            params,
            grads: None,
            overflow: false,
        }
    }

    /// Divides new gradients by `loss_scale` and adds them in.
    ///
    /// Non-finite values mark the current window as overflowed.
    pub fn accumulate(&mut self, mut new_grads: GradStore, loss_scale: f64) -> Result<()> {
        let inv_scale = 1.0 / loss_scale;
        for param in &self.params {
            let tensor = param.as_tensor();
            let Some(grad) = new_grads.remove(tensor) else {
                continue;
            };
            let mut grad = grad.to_dtype(DType::F32)?;
            if inv_scale != 1.0 {
                grad = (grad * inv_scale)?;
            }
            if !self.overflow && !sum_squares(&grad)?.is_finite() {
                self.overflow = true;
            }
            match self.grads.as_mut() {
                Some(store) => {
                    let combined = match store.remove(tensor) {
                        Some(existing) => (existing + grad)?,
                        None => grad,
                    };
                    store.insert(tensor, combined);
                }
                None => {
                    new_grads.insert(tensor, grad);
                }
            }
        }
        if self.grads.is_none() {
            self.grads = Some(new_grads);
        }
        Ok(())
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn global_norm(&self) -> Result<f64> {
        let Some(store) = self.grads.as_ref() else {
            return Ok(0.0);
        };
        let mut total = 0.0;
        for param in &self.params {
            if let Some(grad) = store.get(param.as_tensor()) {
                total += sum_squares(grad)?;
            }
        }
        Ok(total.sqrt())
    }

    /// Rescales to `max_norm` when the global L2 norm exceeds it.
    ///
    /// Returns the norm measured before clipping.
    pub fn clip_grad_norm(&mut self, max_norm: f64) -> Result<f64> {
        let norm = self.global_norm()?;
        let coef = max_norm / (norm + 1e-6);
        if coef < 1.0 && norm.is_finite() {
            if let Some(store) = self.grads.as_mut() {
                for param in &self.params {
                    let tensor = param.as_tensor();
                    if let Some(grad) = store.remove(tensor) {
                        store.insert(tensor, (grad * coef)?);
                    }
                }
            }
        }
        Ok(norm)
    }

    pub fn grads(&self) -> Option<&GradStore> {
        self.grads.as_ref()
    }

    pub fn zero_grad(&mut self) {
        self.grads = None;
        self.overflow = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn param(values: &[f32]) -> Result<Var> {
        Var::from_slice(values, values.len(), &Device::Cpu)
    }

    fn grads_for(var: &Var, scale: f64) -> Result<GradStore> {
        let weights = Tensor::new(&[1f32, 2.0], &Device::Cpu)?;
        (var.as_tensor() * &weights)?.sum_all()?.affine(scale, 0.0)?.backward()
    }

    fn grad_of(acc: &GradAccumulator, var: &Var) -> Result<Vec<f32>> {
        match acc.grads().and_then(|g| g.get(var.as_tensor())) {
            Some(grad) => grad.to_vec1::<f32>(),
            None => Ok(vec![]),
        }
    }

    #[test]
    fn sums_and_unscales() -> Result<()> {
        let var = param(&[0.5, 0.5])?;
        let mut acc = GradAccumulator::new(vec![var.clone()]);
        acc.accumulate(grads_for(&var, 8.0)?, 8.0)?;
        acc.accumulate(grads_for(&var, 8.0)?, 8.0)?;
        assert_eq!(grad_of(&acc, &var)?, vec![2.0, 4.0]);
        assert!(!acc.overflowed());

        acc.zero_grad();
        assert!(acc.grads().is_none());
        assert_eq!(acc.global_norm()?, 0.0);
        Ok(())
    }

    #[test]
    fn clipping_targets_max_norm() -> Result<()> {
        let var = param(&[0.0, 0.0])?;
        let mut acc = GradAccumulator::new(vec![var.clone()]);
        let store = (var.as_tensor() * Tensor::new(&[3f32, 4.0], &Device::Cpu)?)?
            .sum_all()?
            .backward()?;
        acc.accumulate(store, 1.0)?;

        let norm = acc.clip_grad_norm(1.0)?;
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((acc.global_norm()? - 1.0).abs() < 1e-5);

        let unchanged = acc.clip_grad_norm(10.0)?;
        assert!((unchanged - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn infinite_gradients_flag_overflow() -> Result<()> {
        let var = param(&[1.0, 1.0])?;
        let mut acc = GradAccumulator::new(vec![var.clone()]);
        let store = (var.as_tensor() * Tensor::new(&[f32::INFINITY, 1.0], &Device::Cpu)?)?
            .sum_all()?
            .backward()?;
        acc.accumulate(store, 1.0)?;
        assert!(acc.overflowed());
        acc.zero_grad();
        assert!(!acc.overflowed());
        Ok(())
    }
}
