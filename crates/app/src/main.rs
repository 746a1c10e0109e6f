use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tally_core::Reconciler;
use tracing_subscriber::EnvFilter;

mod batch;
mod config;
mod prompt;
mod render;

use batch::{expand_pattern, process_statement, BatchOptions, Ledgers};
use config::Config;
use render::RenderOptions;

#[derive(Parser, Debug)]
#[command(
    name = "tally",
    version,
    about = "Reconcile bank statement exports against a GnuCash book"
)]
struct Cli {
    /// Statement files or shell-style patterns
    #[arg(required = true)]
    statements: Vec<String>,

    /// TOML configuration with connections, formats and importers
    #[arg(short = 'c', long)]
    configuration: PathBuf,

    /// Open ledgers read-write, asking for a login when a server book is configured
    #[arg(short, long)]
    elevate: bool,

    /// Record statement-only entries in the ledger
    #[arg(short, long, requires = "elevate")]
    update: bool,

    /// Importer id to use instead of the account number found in each file
    #[arg(short = 'i', long)]
    target: Option<String>,

    /// Also list entries matched on the same date
    #[arg(short, long)]
    all: bool,

    /// Print entries as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Process every statement; `Ok(false)` when at least one batch failed.
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(&cli.configuration).with_context(|| {
        format!(
            "Failed to load configuration {}",
            cli.configuration.display()
        )
    })?;

    let reconciler = Reconciler::new(config.options.epsilon);
    let mut ledgers = Ledgers::new(config.connections.clone(), cli.elevate);
    if cli.elevate && config.requires_credentials() {
        let credentials = prompt::ask_credentials().context("Failed to read credentials")?;
        tracing::debug!(username = credentials.username(), "using ledger login");
        ledgers = ledgers.with_credentials(credentials);
    }
    let options = BatchOptions {
        target: cli.target,
        update: cli.update,
        json: cli.json,
        render: RenderOptions {
            show_all: cli.all,
            styled: std::io::stdout().is_terminal(),
        },
    };

    let mut out = std::io::stdout().lock();
    let mut succeeded = true;

    for pattern in &cli.statements {
        let files = match expand_pattern(pattern) {
            Ok(files) => files,
            Err(e) => {
                eprintln!("{pattern}: {e:#}");
                succeeded = false;
                continue;
            }
        };
        if files.is_empty() {
            tracing::warn!(%pattern, "no statement files matched");
        }

        for path in files {
            match process_statement(&path, &config, &mut ledgers, &reconciler, &options, &mut out)
                .await
            {
                Ok(report) => tracing::info!(
                    path = %path.display(),
                    importer = %report.importer,
                    duplicates = report.summary.duplicates,
                    matched = report.summary.matched_exact + report.summary.matched_shifted,
                    ledger_only = report.summary.ledger_only,
                    statement_only = report.summary.statement_only,
                    written = report.written,
                    skipped = report.skipped,
                    "reconciled statement"
                ),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = ?e, "batch failed");
                    eprintln!("{}: {e:#}", path.display());
                    succeeded = false;
                }
            }
        }
    }

    Ok(succeeded)
}
