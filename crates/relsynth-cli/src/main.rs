mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relsynth_core::Error as CoreError;
use relsynth_populate::PopulateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Populate(#[from] PopulateError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

#[derive(Parser, Debug)]
#[command(name = "relsynth", version, about = "Populate relational databases with synthetic data")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    /// Also write newline-delimited JSON logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured statistics queries against the source database.
    MakeStats(MakeStatsArgs),
    /// Generate rows into the destination database.
    CreateData(CreateDataArgs),
    /// Delete generated rows from the destination database.
    RemoveData(RemoveDataArgs),
    /// Check table descriptors and config without touching a database.
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct MakeStatsArgs {
    /// Source database connection string.
    #[arg(long, value_name = "CONNECTION_STRING")]
    pub src: String,
    #[arg(long)]
    pub config: PathBuf,
    /// Where to write the statistics JSON.
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct CreateDataArgs {
    /// Destination database connection string.
    #[arg(long, value_name = "CONNECTION_STRING")]
    pub dst: String,
    /// Source database; statistics are collected from it when --stats is absent.
    #[arg(long, value_name = "CONNECTION_STRING")]
    pub src: Option<String>,
    #[arg(long)]
    pub metadata: PathBuf,
    #[arg(long)]
    pub config: PathBuf,
    /// Statistics written earlier by make-stats.
    #[arg(long)]
    pub stats: Option<PathBuf>,
    /// Override the configured number of passes.
    #[arg(long)]
    pub passes: Option<u32>,
    /// Write the run report as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RemoveDataArgs {
    #[arg(long, value_name = "CONNECTION_STRING")]
    pub dst: String,
    #[arg(long)]
    pub metadata: PathBuf,
    #[arg(long)]
    pub config: PathBuf,
    /// Confirm the deletion.
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(long)]
    pub metadata: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Command::MakeStats(args) => commands::make_stats(args).await,
        Command::CreateData(args) => commands::create_data(args).await,
        Command::RemoveData(args) => commands::remove_data(args).await,
        Command::Validate(args) => commands::validate(args),
    }
}
