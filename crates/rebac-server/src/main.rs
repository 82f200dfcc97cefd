use std::sync::Arc;

use clap::Parser;
use rebac_server::cli::{Cli, Command};
use rebac_server::config::{AppConfig, LogFormat, StorageBackend};
use rebac_server::metrics::Metrics;
use rebac_server::service::AuthzService;
use rebac_server::worker::{WorkerConfig, WorkerPool};
use rebac_storage::{Backend, InMemoryBackend, PostgresBackend};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match config.database.backend {
        StorageBackend::Memory => {
            if matches!(cli.command, Some(Command::Migrate)) {
                tracing::info!("memory backend needs no migrations");
                return Ok(());
            }
            let backend = InMemoryBackend::new(config.to_queue_policy());
            run(config, backend, cli.command).await
        }
        StorageBackend::Postgres => {
            let backend = PostgresBackend::connect(
                &config.database.url,
                config.database.max_connections,
                &config.database.schema,
                config.to_queue_policy(),
            )
            .await?;

            tracing::info!(schema = %config.database.schema, "running database migrations");
            backend.migrate().await?;
            if matches!(cli.command, Some(Command::Migrate)) {
                tracing::info!("migrations completed successfully");
                return Ok(());
            }
            run(config, backend, cli.command).await
        }
    }
}

async fn run<B: Backend>(
    config: AppConfig,
    backend: B,
    command: Option<Command>,
) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(Metrics::new());
    let mut service = AuthzService::new(
        backend,
        config.to_engine_config(),
        config.to_policy_limits(),
    )
    .with_metrics(Arc::clone(&metrics));
    if let Some(ttl) = config.cache_ttl() {
        service = service.with_cache(ttl);
    }

    if let Some(path) = &config.policy.path {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read policy file '{}': {e}", path.display()))?;
        service.load_policy(&source)?;
        tracing::info!(
            path = %path.display(),
            resource_types = service.registry().len(),
            "policy loaded"
        );
    } else {
        tracing::warn!("no policy file configured; every check will fail as unregistered");
    }

    match command {
        Some(Command::Worker) | None => run_worker(&config, service).await,
        Some(Command::Migrate) => Ok(()),
        Some(Command::NormalizeTuples { page_size }) => {
            let page_size = page_size.unwrap_or(config.normalizer.page_size);
            let report = service.normalize_tuples(page_size).await?;
            println!("Normalization complete");
            println!("  Normalized:  {}", report.normalized);
            println!("  Duplicates:  {}", report.duplicates);
            println!("  Quarantined: {}", report.quarantined);
            Ok(())
        }
        Some(Command::Reconcile) => {
            let report = service.reconcile(config.index.reconcile_page_size).await?;
            println!("Reconcile complete");
            println!("  Tuples scanned:   {}", report.tuples_scanned);
            println!("  Grants enqueued:  {}", report.grants_enqueued);
            println!("  Revokes enqueued: {}", report.revokes_enqueued);
            for orphan in &report.orphans {
                println!("  Orphan: {orphan}");
            }
            Ok(())
        }
        Some(Command::Check {
            subject,
            action,
            object,
        }) => {
            let allowed = service.check_permission(&subject, &action, &object).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
            if !allowed {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(Command::Grant {
            subject,
            relation,
            object,
        }) => {
            service.grant_relation(&subject, &relation, &object).await?;
            println!("Granted {subject}#{relation}@{object}");
            Ok(())
        }
        Some(Command::Revoke {
            subject,
            relation,
            object,
        }) => {
            service.revoke_relation(&subject, &relation, &object).await?;
            println!("Revoked {subject}#{relation}@{object}");
            Ok(())
        }
    }
}

async fn run_worker<B: Backend>(
    config: &AppConfig,
    service: AuthzService<B>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_config = WorkerConfig::from_app_config(config);
    tracing::info!(
        workers = worker_config.workers,
        poll_interval_ms = config.index.poll_interval_ms,
        "starting rebac index workers"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let pool = WorkerPool::new(Arc::new(service), worker_config);
    let workers = tokio::spawn(pool.run(shutdown_rx));

    shutdown_signal(shutdown_tx).await;
    workers.await?;

    tracing::info!("worker shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }

    let _ = shutdown_tx.send(());
}
