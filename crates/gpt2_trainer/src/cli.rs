use crate::data::ShardArgs;
use crate::train::{PlanArgs, TrainArgs};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "GPT-2 corpus sharding and training", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model (optionally building shards first with --raw)
    Train(TrainArgs),

    /// Tokenize the raw corpus into shard files
    BuildShards(ShardArgs),

    /// Print token count and planned optimizer steps for existing shards
    Plan(PlanArgs),
}
