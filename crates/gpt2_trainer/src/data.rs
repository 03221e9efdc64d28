//! Data pipeline: corpus -> shards -> windows -> batches.

use anyhow::{Context, Result};
use clap::Args;
use gpt2_engine::BertTokenizer;
use std::path::PathBuf;

pub mod batch;
pub mod corpus;
pub mod shards;
pub mod windows;

pub use batch::{make_batches, Batch};
pub use corpus::load_corpus;
pub use shards::{
    build_shards, read_shard, shard_path, total_tokens, DocumentSentinels, ShardOptions,
    ShardSummary,
};
pub use windows::{make_windows, sample_windows};

/// Corpus and shard locations shared by `train` and `build-shards`.
#[derive(Args, Debug, Clone)]
pub struct ShardArgs {
    /// Raw corpus: JSON array of documents (.json, .json.gz, .json.zst)
    #[arg(long, default_value = "data/train.json")]
    pub raw_data_path: PathBuf,

    /// WordPiece vocabulary file
    #[arg(long, default_value = "cache/vocab_small.txt")]
    pub tokenizer_path: PathBuf,

    /// Directory holding tokenized_train_{i}.txt
    #[arg(long, default_value = "data/tokenized")]
    pub tokenized_data_path: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub num_pieces: usize,

    /// Token opening every document
    #[arg(long, default_value = shards::DEFAULT_START_TOKEN)]
    pub start_token: String,

    /// Token closing every document
    #[arg(long, default_value = shards::DEFAULT_END_TOKEN)]
    pub end_token: String,

    /// Token substituted for newlines inside a document
    #[arg(long, default_value = shards::DEFAULT_SEPARATOR_TOKEN)]
    pub separator_token: String,
}

impl ShardArgs {
    pub fn load_tokenizer(&self) -> Result<BertTokenizer> {
        BertTokenizer::from_vocab_file(
            &self.tokenizer_path,
            &[
                self.separator_token.as_str(),
                self.start_token.as_str(),
                self.end_token.as_str(),
            ],
        )
    }
}

/// Reads the raw corpus and writes every shard.
pub fn run_build_shards(args: &ShardArgs) -> Result<Vec<ShardSummary>> {
    let tokenizer = args.load_tokenizer()?;
    let sentinels = DocumentSentinels::resolve(&tokenizer, &args.start_token, &args.end_token)?;
    let mut options = ShardOptions::new(sentinels);
    options.separator = args.separator_token.clone();

    let documents = load_corpus(&args.raw_data_path)?;
    let summaries = build_shards(
        &documents,
        args.num_pieces,
        &tokenizer,
        &options,
        &args.tokenized_data_path,
    )
    .with_context(|| {
        format!(
            "building shards into {}",
            args.tokenized_data_path.display()
        )
    })?;
    Ok(summaries)
}
