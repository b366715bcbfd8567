use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_merge::MergeMode;
use strata_types::{EntityId, PartitionKey};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: a partition-sharded object store with structural merges",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file (defaults to ./strata.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    ThreeWay,
    Apply,
}

impl From<ModeArg> for MergeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::ThreeWay => MergeMode::ThreeWay,
            ModeArg::Apply => MergeMode::Apply,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Merge two versions of a value that diverged from a common one
    Merge(MergeArgs),
    /// Store a value in a transaction, merging with concurrent writes
    Put(PutArgs),
    /// Read the current value of an entity
    Get(EntityArgs),
    /// Delete an entity
    Delete(EntityArgs),
    /// Show every stored revision of an entity
    History(EntityArgs),
    /// Dump the raw entries of a log partition
    Log(LogArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct MergeArgs {
    #[arg(long, value_enum, default_value = "three-way")]
    pub mode: ModeArg,
    /// JSON file with the common ancestor (or the base of an edit)
    pub common: PathBuf,
    /// JSON file with the left version (or the edited value)
    pub left: PathBuf,
    /// JSON file with the right version (or the value to apply onto)
    pub right: PathBuf,
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(long, default_value = "entities#0")]
    pub partition: PartitionKey,
    /// Entity to write; a new id is generated when omitted
    #[arg(long)]
    pub id: Option<EntityId>,
    /// The value as JSON, or `@path` to read it from a file
    pub value: String,
}

#[derive(Args)]
pub struct EntityArgs {
    #[arg(long, default_value = "entities#0")]
    pub partition: PartitionKey,
    #[arg(long)]
    pub id: EntityId,
}

#[derive(Args)]
pub struct LogArgs {
    #[arg(long, default_value = "entities#0")]
    pub partition: PartitionKey,
    /// First offset to show
    #[arg(long, default_value = "0")]
    pub from: u64,
}
