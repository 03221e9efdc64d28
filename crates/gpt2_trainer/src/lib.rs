//! GPT-2 Trainer
//!
//! Turns a JSON corpus into tokenized shards, slices shards into
//! overlapping windows, and trains a GPT-2 model over them with gradient
//! accumulation, optional mixed precision and data parallelism.

pub mod cli;
pub mod data;
pub mod error;
pub mod train;

pub use error::TrainError;
