use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "podup")]
#[command(version)]
#[command(about = "Provision a GPU pod with ordered, idempotent steps", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run provisioning steps against a target
    Run(RunArgs),

    /// List available steps
    Steps,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Do not run two invocations against the same target at once: the state
/// record is last-write-wins and concurrent runs are not serialized.
#[derive(Parser)]
pub struct RunArgs {
    /// Target: 'local', or [user@]host[:port]
    pub target: String,

    /// List the steps and exit without contacting the target
    #[arg(long)]
    pub list: bool,

    /// Start from this step, inclusive (prefix match allowed)
    #[arg(long, value_name = "STEP")]
    pub from: Option<String>,

    /// Run only this single step (takes precedence over --from/--skip)
    #[arg(long, value_name = "STEP")]
    pub only: Option<String>,

    /// Skip a step (repeatable)
    #[arg(long, value_name = "STEP")]
    pub skip: Vec<String>,

    /// Re-run steps even if recorded as done
    #[arg(long)]
    pub force: bool,

    /// Print mutating commands instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// SSH identity file for remote targets
    #[arg(long, value_name = "PATH")]
    pub key: Option<String>,
}
