//! Batch assembly from windows.

use candle_core::{Device, Tensor};

/// `batch_size` windows of equal width.
///
/// `labels` is a separate copy of `inputs`; the model shifts internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub inputs: Vec<u32>,
    pub labels: Vec<u32>,
    pub batch_size: usize,
    pub context_length: usize,
}

impl Batch {
    pub fn from_windows(windows: &[&[u32]]) -> Self {
        let context_length = windows.first().map_or(0, |w| w.len());
        let inputs: Vec<u32> = windows.iter().flat_map(|w| w.iter().copied()).collect();
        Self {
            labels: inputs.clone(),
            inputs,
            batch_size: windows.len(),
            context_length,
        }
    }

    /// `(inputs, labels)` as `[batch_size, context_length]` u32 tensors.
    pub fn to_tensors(&self, device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
        let shape = (self.batch_size, self.context_length);
        let inputs = Tensor::from_slice(&self.inputs, shape, device)?;
        let labels = Tensor::from_slice(&self.labels, shape, device)?;
        Ok((inputs, labels))
    }

    /// Splits along the batch axis into at most `parts` chunks.
    ///
    /// Chunk size is `ceil(batch_size / parts)`; the last chunk may be
    /// smaller and trailing chunks may be absent.
    pub fn split(&self, parts: usize) -> Vec<Batch> {
        if parts <= 1 || self.batch_size == 0 {
            return vec![self.clone()];
        }
        let rows = self.batch_size.div_ceil(parts);
        let width = rows * self.context_length;
        self.inputs
            .chunks(width)
            .zip(self.labels.chunks(width))
            .map(|(inputs, labels)| Batch {
                inputs: inputs.to_vec(),
                labels: labels.to_vec(),
                batch_size: inputs.len() / self.context_length.max(1),
                context_length: self.context_length,
            })
            .collect()
    }
}

/// Groups windows into full batches; a partial tail is dropped.
pub fn make_batches<'a>(
    windows: &'a [&'a [u32]],
    batch_size: usize,
) -> impl ExactSizeIterator<Item = Batch> + 'a {
    windows
        .chunks_exact(batch_size.max(1))
        .map(Batch::from_windows)
}
