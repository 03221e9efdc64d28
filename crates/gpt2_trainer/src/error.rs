//! Error taxonomy for the training pipeline.
//!
//! Every variant carries enough context (stage, file, shard) to diagnose the
//! failure from the log alone. Nothing in the pipeline retries.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Invalid arguments, malformed model config, missing backend support.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A shard, corpus or checkpoint path could not be read or written.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Input that exists but does not have the expected structure.
    #[error("data error in {context}: {message}")]
    Data { context: String, message: String },
}

pub type Result<T, E = TrainError> = std::result::Result<T, E>;

impl TrainError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn data(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            context: context.into(),
            message: message.into(),
        }
    }

    /// `Io` error whose context is "<action> <path>".
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("{} {}", action, path.display()), source)
    }
}
