//! CLI argument definitions.
//!
//! All `clap` structures live here so `main.rs` stays focused on
//! dispatching subcommands.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dagrt",
    version,
    about = "Heterogeneous DAG task runtime demo harness"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the diamond-graph resubmission scenario (A -> {B, C} -> D,
    /// resubmitted from D's callback) and report the final counter value.
    Run {
        /// Number of times to resubmit the diamond graph.
        #[arg(long, short, default_value_t = 64)]
        iterations: u32,

        /// Number of CPU workers to start.
        #[arg(long, short, default_value_t = 4)]
        workers: usize,

        /// Scheduling policy name (overrides DAGRT_SCHED).
        #[arg(long)]
        sched: Option<String>,
    },

    /// Scheduling-policy registry operations.
    Sched {
        #[command(subcommand)]
        action: SchedAction,
    },

    /// Run the two-rank owner-computes distributed dispatch demo.
    Mpi,
}

#[derive(Subcommand)]
pub enum SchedAction {
    /// List every registered scheduling policy name and description.
    List,
}
