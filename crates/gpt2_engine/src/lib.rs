//! GPT-2 Engine
//!
//! Model-side collaborators for the training pipeline: the GPT-2 LM head
//! model and its parameter container, the BERT WordPiece tokenizer, and
//! device discovery.

pub mod device_utils;
pub mod layers;
pub mod lm;
pub mod model;
pub mod tokenizer;

pub use device_utils::DeviceSelector;
pub use lm::CausalLm;
pub use model::{Gpt2Config, Gpt2LMHeadModel, Gpt2Trainable};
pub use tokenizer::{BertTokenizer, TextTokenizer};
