use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vanity_grinder::{
    Args, Commands, GrindConfig, Grinder, IterationOutcome, KeygenWorker, Shutdown, Workspace,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = GrindConfig::from_args(&args);
    init_logging(&config);

    let command = args.command.unwrap_or(Commands::Run);
    if let Err(err) = run(command, config).await {
        eprintln!("vanity-grinder: {err:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: GrindConfig) -> Result<()> {
    let worker = KeygenWorker::new(config.keygen_bin.clone());
    worker
        .ensure_available()
        .context("startup check failed")?;

    let mut grinder = Grinder::new(&config, worker);
    match command {
        Commands::Run => grind_loop(&mut grinder, &config).await,
        Commands::Recover { workspace } => recover(&mut grinder, workspace),
    }
}

async fn grind_loop(grinder: &mut Grinder<KeygenWorker>, config: &GrindConfig) -> Result<()> {
    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "interrupt", "stopping after the current iteration");
                shutdown.request();
            }
        });
    }

    info!(
        event = "grind_loop_start",
        pattern = %config.pattern,
        threads = ?config.threads,
        pause_secs = config.pause.as_secs(),
        keygen_bin = %config.keygen_bin,
        workspace_root = %config.workspace_root.display()
    );

    let stats = grinder
        .run_until(config.pause, config.max_iterations, &shutdown)
        .await;
    info!(
        event = "grind_loop_stop",
        iterations = stats.iterations,
        aborted = stats.aborted,
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        worker_failures = stats.worker_failures,
        empty_successes = stats.empty_successes,
        artifact_failures = stats.artifact_failures,
        retained_workspaces = stats.retained_workspaces
    );
    Ok(())
}

fn recover(grinder: &mut Grinder<KeygenWorker>, path: PathBuf) -> Result<()> {
    if !path.is_dir() {
        bail!("workspace {} does not exist", path.display());
    }
    let report = grinder
        .recover(Workspace::existing(&path))
        .with_context(|| format!("failed to recover {}", path.display()))?;

    for artifact in &report.artifacts {
        info!(
            event = "recover_artifact",
            artifact = %artifact.artifact.display(),
            outcome = artifact.outcome.label()
        );
    }
    if report.outcome == IterationOutcome::Degraded {
        let failed = report
            .artifacts
            .iter()
            .filter(|artifact| !artifact.outcome.is_clean())
            .count();
        bail!(
            "{failed} artifact(s) still unresolved, workspace kept at {}",
            path.display()
        );
    }
    info!(event = "recover_done", artifacts = report.artifacts.len());
    Ok(())
}

fn init_logging(config: &GrindConfig) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("VANITY_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("vanity-grinder: logging already initialized");
    }
}
