//! Execution strategies: where replicas run and how they are saved.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use gpt2_engine::{CausalLm, Gpt2Trainable};
use rayon::prelude::*;
use std::path::Path;

use crate::data::Batch;

pub trait ExecutionStrategy: Send {
    fn name(&self) -> &'static str;

    fn replica_count(&self) -> usize;

    /// Device holding the master weights and the reduced loss.
    fn primary_device(&self) -> &Device;

    /// One loss per replica that received rows, all on the primary device.
    fn forward(
        &self,
        model: &Gpt2Trainable,
        batch: &Batch,
        dtype: DType,
    ) -> candle_core::Result<Vec<Tensor>>;

    /// Writes the master weights and config into `dir`, which must exist.
    fn save_checkpoint(&self, model: &Gpt2Trainable, dir: &Path) -> Result<()>;
}

fn replica_loss(
    model: &Gpt2Trainable,
    batch: &Batch,
    device: &Device,
    dtype: DType,
) -> candle_core::Result<Tensor> {
    let replica = model.replica(device, dtype, true)?;
    let (inputs, labels) = batch.to_tensors(device)?;
    let (loss, _logits) = replica.forward(&inputs, &labels)?;
    Ok(loss)
}

pub struct SingleDevice {
    device: Device,
}

impl SingleDevice {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl ExecutionStrategy for SingleDevice {
    fn name(&self) -> &'static str {
        "single-device"
    }

    fn replica_count(&self) -> usize {
        1
    }

    fn primary_device(&self) -> &Device {
        &self.device
    }

    fn forward(
        &self,
        model: &Gpt2Trainable,
        batch: &Batch,
        dtype: DType,
    ) -> candle_core::Result<Vec<Tensor>> {
        Ok(vec![replica_loss(model, batch, &self.device, dtype)?])
    }

    fn save_checkpoint(&self, model: &Gpt2Trainable, dir: &Path) -> Result<()> {
        model.save_pretrained(dir)
    }
}

/// Splits each batch along its first axis, one chunk per device.
pub struct DataParallel {
    devices: Vec<Device>,
}

impl DataParallel {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

impl ExecutionStrategy for DataParallel {
    fn name(&self) -> &'static str {
        "data-parallel"
    }

    fn replica_count(&self) -> usize {
        self.devices.len()
    }

    fn primary_device(&self) -> &Device {
        &self.devices[0]
    }

    fn forward(
        &self,
        model: &Gpt2Trainable,
        batch: &Batch,
        dtype: DType,
    ) -> candle_core::Result<Vec<Tensor>> {
        let primary = self.primary_device();
        let chunks = batch.split(self.devices.len());
        chunks
            .par_iter()
            .zip(self.devices.par_iter())
            .map(|(chunk, device)| replica_loss(model, chunk, device, dtype)?.to_device(primary))
            .collect()
    }

    fn save_checkpoint(&self, model: &Gpt2Trainable, dir: &Path) -> Result<()> {
        // Replicas are views; the master copy is what gets written.
        model.save_pretrained(dir)
    }
}

/// `DataParallel` when more than one device is available.
pub fn from_devices(mut devices: Vec<Device>) -> Box<dyn ExecutionStrategy> {
    if devices.len() > 1 {
        tracing::info!("Using data parallelism over {} devices", devices.len());
        Box::new(DataParallel::new(devices))
    } else {
        Box::new(SingleDevice::new(devices.pop().unwrap_or(Device::Cpu)))
    }
}
