use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rktime::config::Mode;

#[derive(Parser)]
#[command(name = "rktime")]
#[command(about = "Node time synchronization controller", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the time sync controller using ./rktime start --config rktime.yaml")]
    Start {
        #[arg(short, long, value_name = "CONFIG_YAML")]
        config: PathBuf,
        /// Overrides the mode from the config file.
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },
}
