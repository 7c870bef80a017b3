use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

#[derive(Parser)]
#[command(name = "terrace")]
#[command(about = "Pipeline resource for terraform-managed environments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest state and outputs of an environment
    Get {
        /// Directory receiving `name`, `metadata` and optionally the state file
        dir: PathBuf,
    },
    /// Apply or destroy an environment
    Put {
        /// Directory holding the step's inputs
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // stdout carries the JSON response; everything else goes to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    log::debug!("argv: {:?}", std::env::args().collect::<Vec<_>>());

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Get { dir } => commands::get::run(&dir).await,
        Commands::Put { dir } => commands::put::run(&dir).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
