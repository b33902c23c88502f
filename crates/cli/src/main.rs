//! `cytoflow`: run, export and upgrade saved workflows.

mod commands;
mod telemetry;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cytoflow")]
#[command(version, about = "Run and maintain saved cytometry workflows", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the `.cytoflow/` configuration
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a workflow, run it and report every item's status
    Run {
        file: PathBuf,

        /// Print a JSON snapshot instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Export a workflow as a Jupyter notebook
    Notebook {
        file: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-save a workflow with the current (or pinned) tag versions
    Upgrade {
        input: PathBuf,
        output: PathBuf,

        /// Pin a tag's version, e.g. `--lock workflow-item=2`
        #[arg(long = "lock", value_parser = commands::parse_lock)]
        locks: Vec<(String, u32)>,
    },

    /// Run every workflow under `.cytoflow/workflows/`
    Batch,

    /// List registered tags and their versions
    Tags,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Run { file, json } => commands::run(&cli.root, &file, json).await,
        Commands::Notebook { file, output } => commands::notebook(&file, output.as_deref()),
        Commands::Upgrade {
            input,
            output,
            locks,
        } => commands::upgrade(&cli.root, &input, &output, locks).await,
        Commands::Batch => commands::batch(&cli.root).await,
        Commands::Tags => {
            commands::tags();
            Ok(())
        }
    }
}
