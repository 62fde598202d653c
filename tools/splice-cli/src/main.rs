//! Splice CLI: run scripts on a worker thread, record, and inspect output.
//!
//! Usage:
//!   splice script <RESOURCE> <STATEMENT>...   Load a JSON resource and evaluate statements
//!   splice record [OPTIONS]                   Record a synthetic capture with pauses
//!   splice inspect <PATH>                     Summarize a sample log
//!   splice config [--init]                    Show or initialize the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use splice_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "splice",
    about = "Single-thread command execution and pause-aware recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON resource into a script context and evaluate statements
    Script {
        /// Resource path or file:// URL
        resource: String,

        /// Directory relative resources are resolved against
        #[arg(long)]
        root: Option<PathBuf>,

        /// Statements to evaluate, in order
        #[arg(required = true)]
        statements: Vec<String>,
    },

    /// Record a synthetic capture into a sample log
    Record {
        /// Output file (defaults to the configured output path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture length in seconds, pauses included
        #[arg(short, long, default_value = "3.0")]
        duration: f64,

        /// Video frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Pause at this many seconds into the capture (repeatable)
        #[arg(long = "pause-at")]
        pause_at: Vec<f64>,

        /// Resume at this many seconds into the capture (repeatable)
        #[arg(long = "resume-at")]
        resume_at: Vec<f64>,

        /// Minimum recording length in seconds
        #[arg(long)]
        min: Option<f64>,

        /// Maximum recording length in seconds
        #[arg(long)]
        max: Option<f64>,
    },

    /// Summarize a sample log
    Inspect {
        /// Path to the sample log
        path: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    splice_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Script {
            resource,
            root,
            statements,
        } => commands::script::run(&config, resource, root, statements).await,
        Commands::Record {
            output,
            duration,
            fps,
            pause_at,
            resume_at,
            min,
            max,
        } => {
            let options = commands::record::RecordOptions {
                output,
                duration_secs: duration,
                fps,
                pauses: commands::record::pause_windows(&pause_at, &resume_at)?,
                min_secs: min,
                max_secs: max,
            };
            commands::record::run(config, options).await
        }
        Commands::Inspect { path } => commands::inspect::run(path),
        Commands::Config { init } => commands::config::run(&config, init),
    }
}
