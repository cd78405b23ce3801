// Scheduler binary entry point

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use common::client::HttpApiClientFactory;
use common::config::Settings;
use common::jobs::{JobRunner, JobServices};
use common::scheduler::{Scheduler, SchedulerEngine};
use common::secrets::DefaultSecretProvider;
use common::sftp::Ssh2SftpTransfer;
use common::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "File-based integration scheduler")]
struct Cli {
    /// Directory holding default.toml and local.toml
    #[arg(long, default_value = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every enabled job on its schedule until Ctrl+C (default)
    Serve,
    /// Run one job immediately and exit
    RunOnce { job_key: String },
    /// Connect to every SFTP endpoint of a job
    ValidateSftp { job_key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from_path(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    info!(
        scheduler = %settings.scheduler.name,
        jobs = settings.jobs.len(),
        "Configuration loaded"
    );

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
        info!(metrics_port = port, "Prometheus exporter listening");
    }

    let services = JobServices {
        api_factory: Arc::new(HttpApiClientFactory),
        sftp: Arc::new(Ssh2SftpTransfer::default()),
        secrets: Arc::new(DefaultSecretProvider),
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings, services).await,
        Command::RunOnce { job_key } => run_once(settings, services, &job_key).await,
        Command::ValidateSftp { job_key } => validate_sftp(&settings, &services, &job_key).await,
    }
}

async fn serve(settings: Settings, services: JobServices) -> Result<()> {
    let engine = Arc::new(SchedulerEngine::new(
        &settings.scheduler,
        settings.jobs,
        JobRunner::new(services),
    ));
    let shutdown = engine.shutdown_token();

    let signal_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        signal_engine.stop().await;
    });

    let mut running = engine.start();
    tokio::select! {
        result = &mut running => result?,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(engine.shutdown_timeout(), &mut running).await {
                Ok(result) => result?,
                Err(_) => warn!(
                    timeout_seconds = engine.shutdown_timeout().as_secs(),
                    "In-flight job runs did not finish before the shutdown timeout"
                ),
            }
        }
    }

    info!("Scheduler stopped");
    Ok(())
}

async fn run_once(settings: Settings, services: JobServices, job_key: &str) -> Result<()> {
    let engine = SchedulerEngine::new(&settings.scheduler, settings.jobs, JobRunner::new(services));
    let outcome = engine
        .trigger_now(job_key)
        .await
        .ok_or_else(|| anyhow!("no enabled job with key '{}'", job_key))??;
    info!(job_key = job_key, outcome = outcome.as_str(), "Job run finished");
    Ok(())
}

async fn validate_sftp(settings: &Settings, services: &JobServices, job_key: &str) -> Result<()> {
    let job = settings
        .job(job_key)
        .ok_or_else(|| anyhow!("no job with key '{}'", job_key))?;
    let endpoints = job.kind.sftp_endpoints();
    if endpoints.is_empty() {
        bail!("job '{}' has no SFTP relay enabled", job_key);
    }

    for endpoint in endpoints {
        let config = endpoint.resolve("sftp", services.secrets.as_ref())?;
        services.sftp.validate_connection(&config).await?;
        info!(
            job_key = job_key,
            host = %config.host,
            remote_folder = %config.remote_folder,
            "SFTP connection validated"
        );
    }
    Ok(())
}
