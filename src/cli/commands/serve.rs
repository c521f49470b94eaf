//! `driftloop serve`: run the orchestrator loop and the HTTP ingress.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::http::{HttpBackend, WebhookNotifier};
use crate::adapters::ingress;
use crate::adapters::mock::MockBackend;
use crate::adapters::sqlite::{SqliteBudgetRepository, SqliteJobRepository, SqliteStabilityRepository};
use crate::cli::types::ServeArgs;
use crate::domain::models::Config;
use crate::domain::ports::{AuditLog, Clock, SystemClock};
use crate::infrastructure::logging::{AuditLogger, JsonlNotificationLog, LogConfig, LoggerImpl};
use crate::services::{NotificationBus, NotificationBusConfig, Orchestrator, OrchestratorPorts};

use super::open_database;

pub async fn execute(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    let pool = open_database(&config).await?;
    let audit: Arc<dyn AuditLog> = Arc::new(
        AuditLogger::new(&config.logging.audit_log_path)
            .await
            .with_context(|| format!("failed to open audit log {}", config.logging.audit_log_path))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ports = if args.dry_run {
        warn!("dry run: training backend replaced by scripted in-process collaborators");
        MockBackend::new().ports(pool, audit, clock)
    } else {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        OrchestratorPorts {
            stability: Arc::new(SqliteStabilityRepository::new(pool.clone())),
            budgets: Arc::new(SqliteBudgetRepository::new(pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(pool)),
            data: backend.clone(),
            runner: backend.clone(),
            registry: backend.clone(),
            evaluator: backend.clone(),
            health: backend,
            audit,
            clock,
        }
    };

    let mut bus = NotificationBus::new(NotificationBusConfig::default()).with_channel(Arc::new(
        JsonlNotificationLog::new(&config.notifications.log_path)
            .await
            .with_context(|| format!("failed to open notification log {}", config.notifications.log_path))?,
    ));
    if let Some(url) = &config.notifications.webhook_url {
        let timeout = Duration::from_secs(config.notifications.webhook_timeout_secs);
        bus = bus.with_channel(Arc::new(WebhookNotifier::new(url.clone(), timeout)?));
    }

    let bind = config.server.bind.clone();
    let orchestrator = Orchestrator::new(config, ports, Arc::new(bus));

    let recovered = orchestrator.recover().await?;
    for target in &args.bootstrap {
        match orchestrator.bootstrap_target(target).await {
            Ok(Some(record)) => info!(target_id = %target, production_ref = %record.current_production_ref, "baseline recorded"),
            Ok(None) => warn!(target_id = %target, "registry has no production model to bootstrap from"),
            Err(e) => warn!(target_id = %target, error = %e, "baseline bootstrap failed"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatch = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    info!(%bind, recovered, dry_run = args.dry_run, "driftloop serving");
    let serve_result = ingress::serve(orchestrator.clone(), &bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    })
    .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatch.await {
        warn!(error = %e, "dispatch loop ended abnormally");
    }
    orchestrator.shutdown().await;

    serve_result.with_context(|| format!("ingress on {bind} failed"))
}
