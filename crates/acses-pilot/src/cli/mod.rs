use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "acses-pilot",
    version,
    about = "Resumable, rate-limited LLM validation of KBLI code assignments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run (or resume) a pilot validation study.
    Run(RunArgs),
    /// List known model tiers and their pacing.
    Models,
    /// Summarize an existing result ledger.
    Status(StatusArgs),
    /// Write a copy of a dataset with stable UUID sample ids.
    AssignIds(AssignIdsArgs),
    /// Verify inputs, the API key and model connectivity before a run.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default)]
pub struct RunArgs {
    /// Model id, e.g. `models/gemini-2.5-flash-lite`.
    #[arg(long, short = 'm')]
    pub model: Option<String>,
    /// Compare several models back to back, each with its own ledger.
    #[arg(long, value_delimiter = ',', num_args = 1.., conflicts_with = "model")]
    pub models: Vec<String>,
    /// Pause between models of a comparison run.
    #[arg(long, value_name = "SECS")]
    pub cooldown_secs: Option<u64>,
    /// Dataset file name under `data/input` (or a path).
    #[arg(long, short = 'd')]
    pub dataset: Option<String>,
    /// Successful runs required per sample.
    #[arg(long, short = 'r', value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: Option<u32>,
    /// Sampling temperature (0.0 to 2.0).
    #[arg(long, short = 't')]
    pub temperature: Option<f32>,
    /// Sweeps over the dataset in this invocation.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub passes: Option<u32>,
    /// Attempts per run before recording a failure.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: Option<u32>,
    /// Project root holding `data/` and `prompts/`.
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,
    /// Directory for result ledgers.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Codebook CSV (defaults to `data/output/kbli_codebook_hierarchical.csv`).
    #[arg(long, value_name = "FILE")]
    pub codebook: Option<PathBuf>,
    /// Prompt template (defaults to `prompts/master_prompt.txt`).
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Ledger file to inspect. Defaults to the ledger for the configured
    /// model and dataset.
    #[arg(value_name = "LEDGER")]
    pub ledger: Option<PathBuf>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub dataset: Option<String>,
    /// Completed runs expected per sample, for the completion line.
    #[arg(long)]
    pub runs: Option<u32>,
}

#[derive(Debug, Args)]
pub struct AssignIdsArgs {
    /// Dataset to annotate (name under `data/input` or a path).
    #[arg(value_name = "DATASET")]
    pub dataset: String,
    /// Overwrite an existing `<stem>_with_ids.csv`.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Model to test; defaults to the configured model.
    #[arg(long, short = 'm')]
    pub model: Option<String>,
    /// Dataset file name under `data/input` (or a path).
    #[arg(long, short = 'd')]
    pub dataset: Option<String>,
    /// Project root holding `data/` and `prompts/`.
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,
    /// Only check local inputs; make no API call.
    #[arg(long)]
    pub offline: bool,
}
