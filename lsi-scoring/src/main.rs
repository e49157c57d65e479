//! lsi-scoring - operator entry point
//!
//! ```bash
//! lsi-scoring finalize <SESSION_ID>
//! lsi-scoring percentile --scale AC --raw 31 [--group "Doctoral Degree"]...
//! lsi-scoring percentile --scale AC --raw 31 --group Total --version default --exact
//! lsi-scoring load-norms norms.json
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lsi_common::config::{LoggingConfig, TomlConfig};
use lsi_scoring::norms::repository::NormTable;
use lsi_scoring::{NormGroupChain, NormResolver, PipelineOrchestrator, StrategyRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Command-line arguments for lsi-scoring
#[derive(Parser, Debug)]
#[command(name = "lsi-scoring")]
#[command(about = "Learning-style inventory scoring engine")]
#[command(version)]
struct Args {
    /// Config file (overrides LSI_CONFIG and the platform config dir)
    #[arg(short, long, env = "LSI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a started session and print the snapshot as JSON
    Finalize {
        session_id: Uuid,
    },

    /// Convert one raw score to a percentile
    Percentile {
        #[arg(long)]
        scale: String,

        #[arg(long, allow_hyphen_values = true)]
        raw: i32,

        /// Norm group, most specific first; may be repeated
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Norm version, used with --exact
        #[arg(long)]
        version: Option<String>,

        /// Read one stored row only, without fallbacks
        #[arg(long, requires = "version")]
        exact: bool,
    },

    /// Replace norm tables from a JSON file holding an array of tables
    LoadNorms {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(
        "Starting lsi-scoring v{} (database: {})",
        env!("CARGO_PKG_VERSION"),
        config.database_path.display()
    );

    let pool = lsi_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let resolver = Arc::new(
        NormResolver::from_settings(pool.clone(), &config.scoring)
            .context("Failed to build norm resolver")?,
    );

    match args.command {
        Command::Finalize { session_id } => {
            let registry = Arc::new(StrategyRegistry::standard()?);
            let orchestrator = PipelineOrchestrator::new(pool, registry, resolver)
                .with_audit_secret(config.scoring.resolved_audit_secret());

            let snapshot = orchestrator.finalize(session_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Command::Percentile {
            scale,
            raw,
            groups,
            version,
            exact,
        } => {
            if exact {
                let [group] = groups.as_slice() else {
                    bail!("--exact needs exactly one --group");
                };
                let version = version.unwrap_or_else(|| config.scoring.default_norm_version.clone());
                let percentile = resolver
                    .repository()
                    .fetch_one(group, &version, &scale, raw)
                    .await?;
                println!("{}", serde_json::json!({ "percentile": percentile }));
            } else {
                let chain = NormGroupChain::new(groups);
                let result = resolver.resolve(&chain, &scale, raw).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }

        Command::LoadNorms { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let tables: Vec<NormTable> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            for table in &tables {
                let written = resolver.bulk_load(table).await?;
                info!(group = %table.group, version = %table.version, written, "Norm table loaded");
            }
        }
    }

    Ok(())
}

/// Install the fmt subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}
