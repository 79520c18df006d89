//! CLI command definitions and dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::SandboxConfig;
use crate::content::{ContentStore, InMemoryLedger, YamlContentStore};
use crate::sandbox::{DockerClient, PlaybookExecutor, TopologyManager};
use crate::scheduler::{JobQueue, Sweeper, WorkerPool, WorkerPoolConfig};
use crate::storage::{AttemptRecorder, Database, SessionRegistry};
use crate::submission::SubmissionService;
use crate::validator::PlaybookValidator;

/// Command-line interface for the ansibox platform.
#[derive(Debug, Parser)]
#[command(name = "ansibox", version, about = "Ansible learning sandbox platform")]
pub struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP server, worker pool and sweeper.
    Serve {
        /// Address to bind.
        #[arg(long, env = "ANSIBOX_BIND", default_value = "0.0.0.0:8080")]
        bind: String,

        /// Directory of exercise YAML definitions.
        #[arg(long, env = "ANSIBOX_EXERCISES_DIR", default_value = "exercises")]
        exercises_dir: PathBuf,
    },
    /// Apply database migrations and exit.
    Migrate,
    /// Run one sweep pass over expired and stranded sessions.
    Sweep,
    /// Stop and remove every labelled sandbox container.
    Reap,
    /// Validate a playbook file without executing it.
    Validate {
        /// Path to the playbook.
        file: PathBuf,
    },
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatches a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = SandboxConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Serve {
            bind,
            exercises_dir,
        } => serve(config, &bind, &exercises_dir).await,
        Commands::Migrate => migrate(config).await,
        Commands::Sweep => sweep(config).await,
        Commands::Reap => reap(config).await,
        Commands::Validate { file } => validate(&file),
    }
}

/// Runs the full platform: HTTP API, deferred-submission workers, sweeper.
async fn serve(config: SandboxConfig, bind: &str, exercises_dir: &Path) -> anyhow::Result<()> {
    let database = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    database
        .run_migrations()
        .await
        .context("failed to run migrations")?;

    let docker = Arc::new(DockerClient::new().context("failed to connect to Docker daemon")?);
    let registry = SessionRegistry::new(database.pool().clone());
    let ledger = Arc::new(InMemoryLedger::new());
    let recorder = AttemptRecorder::new(
        database.pool().clone(),
        ledger,
        config.hint_penalty_points,
    );
    let topology = Arc::new(TopologyManager::new(Arc::clone(&docker), config.clone()));
    let executor = PlaybookExecutor::new(Arc::clone(&docker));

    let content: Arc<dyn ContentStore> = if exercises_dir.is_dir() {
        Arc::new(
            YamlContentStore::load_dir(exercises_dir)
                .with_context(|| format!("failed to load exercises from {exercises_dir:?}"))?,
        )
    } else {
        warn!(dir = ?exercises_dir, "Exercises directory not found, starting with none");
        Arc::new(YamlContentStore::empty())
    };

    let service = Arc::new(SubmissionService::new(
        config.clone(),
        registry.clone(),
        recorder,
        Arc::clone(&topology),
        executor,
        content,
    ));

    let queue = Arc::new(JobQueue::new());
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(config.num_workers),
        Arc::clone(&queue),
        Arc::clone(&service),
    );
    pool.start()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper = Sweeper::new(
        registry,
        topology,
        config.sweep_interval(),
        config.recovery_window(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_tx.subscribe()));

    let app = api::router(AppState { service, queue });
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = bind, "ansibox listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Worker pool shutdown incomplete");
    }
    let _ = sweeper_handle.await;

    Ok(())
}

/// Applies database migrations.
async fn migrate(config: SandboxConfig) -> anyhow::Result<()> {
    let database = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    database.run_migrations().await?;
    println!("Migrations applied");
    Ok(())
}

/// Runs a single sweep pass.
async fn sweep(config: SandboxConfig) -> anyhow::Result<()> {
    let database = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let docker = Arc::new(DockerClient::new().context("failed to connect to Docker daemon")?);
    let registry = SessionRegistry::new(database.pool().clone());
    let topology = Arc::new(TopologyManager::new(docker, config.clone()));

    let sweeper = Sweeper::new(
        registry,
        topology,
        config.sweep_interval(),
        config.recovery_window(),
    );
    let report = sweeper.sweep_once().await?;
    println!(
        "Sweep finished: {} expired, {} recovered, {} failures",
        report.expired, report.recovered, report.failures
    );
    Ok(())
}

/// Removes every container carrying the application label.
async fn reap(config: SandboxConfig) -> anyhow::Result<()> {
    let docker = Arc::new(DockerClient::new().context("failed to connect to Docker daemon")?);
    let topology = TopologyManager::new(docker, config);

    let removed = topology.reap_all_labelled().await?;
    println!("Removed {removed} containers");
    Ok(())
}

/// Validates a playbook file and prints the report.
fn validate(file: &Path) -> anyhow::Result<()> {
    let playbook =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
    let report = PlaybookValidator::validate(&playbook);

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        anyhow::bail!("playbook failed validation");
    }
    Ok(())
}

/// Resolves when SIGINT arrives.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["ansibox", "serve"]).expect("parses");
        match cli.command {
            Commands::Serve {
                bind,
                exercises_dir,
            } => {
                assert_eq!(bind, "0.0.0.0:8080");
                assert_eq!(exercises_dir, PathBuf::from("exercises"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_validate_takes_file() {
        let cli = Cli::try_parse_from(["ansibox", "validate", "site.yml"]).expect("parses");
        match cli.command {
            Commands::Validate { file } => assert_eq!(file, PathBuf::from("site.yml")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli =
            Cli::try_parse_from(["ansibox", "--log-level", "debug", "migrate"]).expect("parses");
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Migrate));
    }
}
