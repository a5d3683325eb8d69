use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Run a table of inputs against a workflow, one task per row.
#[derive(Parser, Debug)]
#[command(name = "batchrun", about = "Batch runner for streaming workflow endpoints")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a CSV, run every row and export the results.
    Run(RunArgs),
    /// Show finished runs recorded in a history file.
    History(HistoryArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// CSV with a header row; one task per data row.
    #[arg(long)]
    pub input: PathBuf,

    /// JSON file with the input slot declarations. Defaults to one required
    /// text slot per CSV column.
    #[arg(long)]
    pub slots: Option<PathBuf>,

    #[arg(long)]
    pub workflow_id: String,

    /// Display name reported to the run log.
    #[arg(long, default_value = "workflow")]
    pub name: String,

    /// Run a single node instead of the whole workflow.
    #[arg(long, requires = "node_name")]
    pub node_id: Option<String>,

    #[arg(long, requires = "node_id")]
    pub node_name: Option<String>,

    /// Overrides BATCHRUN_API_BASE_URL.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Overrides BATCHRUN_GROUP_SIZE.
    #[arg(long)]
    pub group_size: Option<usize>,

    /// Per-task timeout in seconds; overrides BATCHRUN_TASK_TIMEOUT_MS.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Retry each failed task once after the run.
    #[arg(long, default_value_t = false)]
    pub retry_failed: bool,

    /// Skip the debug-mode check before submitting.
    #[arg(long, default_value_t = false)]
    pub skip_debug_gate: bool,

    /// Do not report run counts to the run log endpoint.
    #[arg(long, default_value_t = false)]
    pub no_run_log: bool,

    /// Results file; `.xlsx` writes a workbook, anything else CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// History file to append this run to.
    #[arg(long)]
    pub history: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long)]
    pub history: PathBuf,

    /// Only this workflow; all workflows otherwise.
    #[arg(long)]
    pub workflow_id: Option<String>,
}
