pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use rpasync_core::error::Result;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Once) => handlers::handle_once(cli.config).await,
        Some(Commands::Run { interval }) => handlers::handle_run(cli.config, interval).await,
        Some(Commands::Status { json }) => handlers::handle_status(cli.config, json),
    }
}
