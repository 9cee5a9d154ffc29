use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Sync bucket objects into an RPA pickup folder and track what was sent",
    long_about = None
)]
pub struct Cli {
    /// JSON config file; RPASYNC_* / AWS_* environment variables override it
    #[arg(long, short, global = true, env = "RPASYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// With no subcommand a single pass runs.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run one sync pass; exits non-zero if any transfer failed
    Once,

    /// Poll until interrupted (Ctrl-C)
    Run {
        /// seconds between passes (overrides sync.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Print the tracked transfer records
    Status {
        /// dump the whole ledger as JSON
        #[arg(long)]
        json: bool,
    },
}
