use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;
use crate::store::JobStatus;

#[derive(Parser, Debug)]
#[command(
    name = "batchscribe",
    version,
    about = "Resumable batch transcription of audio/video directories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe every audio/video file under a directory, resuming earlier runs.
    Run(RunArgs),
    /// Transcribe one file without tracking it.
    Single(SingleArgs),
    /// Show progress for a batch.
    Status(StatusArgs),
    /// Reprocess every failed file of a batch.
    Retry(RetryArgs),
    /// List tracked files and their statuses.
    List(ListArgs),
    /// List available models, sizes, and language support.
    Models,
}

/// Settings shared by commands that run the model; unset values come from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Registry model name or path to a ggml model file.
    #[arg(long)]
    pub model: Option<String>,
    /// Language code such as `en`. Auto-detected when omitted.
    #[arg(long)]
    pub language: Option<String>,
    /// Vocabulary JSON file.
    #[arg(long)]
    pub vocab: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[command(flatten)]
    pub engine: ModelArgs,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// Re-transcribe files that already completed.
    #[arg(long)]
    pub overwrite: bool,
    /// Only take over files left at `processing` after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub reclaim_after: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SingleArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub engine: ModelArgs,
    /// Output file; the transcript goes to stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    pub output_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    pub output_dir: PathBuf,
    // An unset model falls back to the one recorded on each row.
    #[command(flatten)]
    pub engine: ModelArgs,
    #[arg(long, value_name = "SECS")]
    pub reclaim_after: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    pub output_dir: PathBuf,
    #[arg(long, value_enum)]
    pub status: Option<JobStatus>,
    /// name, status, or duration.
    #[arg(long, default_value = "name")]
    pub sort: String,
}
