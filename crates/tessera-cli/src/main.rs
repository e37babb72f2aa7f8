//! tessera - run contract-checked extraction pipelines from the command line.
//!
//! # Configuration
//!
//! `--config` accepts a TOML, JSON, or YAML file. Environment variables
//! (`TESSERA_*`, optionally from a `.env` file) are applied on top.
//!
//! Logs go to stderr; `RUST_LOG` overrides the default filter.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Reconcile layout detections and run contract-checked document pipelines"
)]
struct Cli {
    /// Configuration file (.toml, .json, .yaml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug-level logging for tessera crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over one or more documents
    Run {
        /// Document JSON file(s)
        #[arg(required = true)]
        documents: Vec<PathBuf>,

        /// Stop after this stage (extraction, bundling, load)
        #[arg(long, value_name = "STAGE")]
        until: Option<String>,

        /// Write the final stage output of each run to this JSONL file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Check a records file against a stage contract
    Validate {
        /// JSON file holding a record array or a payload object
        input_file: PathBuf,

        /// Contract to check against
        #[arg(short, long, value_name = "STAGE")]
        stage: String,
    },
    /// Measure label-to-content distances to tune the pairing threshold
    Calibrate {
        /// Document JSON file
        document: PathBuf,
    },
    /// Print the stage contracts
    Contracts,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tessera=debug" } else { "tessera=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            documents,
            until,
            output,
        } => commands::run::run(cli.config, documents, until.as_deref(), output).await,
        Commands::Validate { input_file, stage } => commands::validate::run(&input_file, &stage),
        Commands::Calibrate { document } => commands::calibrate::run(cli.config, &document).await,
        Commands::Contracts => commands::contracts::run(),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}
