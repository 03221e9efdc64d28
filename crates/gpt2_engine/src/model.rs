//! Model Module - GPT-2 LM head model
//!
//! - Gpt2Config: architecture configuration (JSON)
//! - Gpt2Block: single transformer block
//! - Gpt2LMHeadModel: embeddings, blocks, tied LM head, shifted LM loss
//! - Gpt2Trainable: the parameter set that training mutates and checkpoints

pub mod block;
pub mod config;
pub mod gpt2;
pub mod trainable;

pub use block::Gpt2Block;
pub use config::Gpt2Config;
pub use gpt2::Gpt2LMHeadModel;
pub use trainable::Gpt2Trainable;
