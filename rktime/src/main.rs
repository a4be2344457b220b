use clap::Parser;
use rktime::daemon;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config, mode } => {
            let cancel = CancellationToken::new();
            tokio::spawn(daemon::cancel_on_signal(
                tokio::signal::ctrl_c(),
                cancel.clone(),
            ));
            daemon::run(config, mode, cancel).await
        }
    }
}
