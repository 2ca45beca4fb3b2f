use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use k1s0_admission_server::adapter;
use k1s0_admission_server::domain::repository::{QuotaStore, SystemSampleRepository};
use k1s0_admission_server::domain::service::{AdmissionPolicy, RandomSource};
use k1s0_admission_server::infrastructure::config::Config;
use k1s0_admission_server::infrastructure::host_probe::ProcfsProbe;
use k1s0_admission_server::infrastructure::in_memory::{
    InMemoryQuotaStore, InMemorySampleRepository,
};
use k1s0_admission_server::infrastructure::membership::{
    CachedMembershipLookup, HttpMembershipLookup, MembershipLookup, StaticMembershipLookup,
};
use k1s0_admission_server::infrastructure::metrics::{self, AdmissionMetrics};
use k1s0_admission_server::infrastructure::notifier::{
    AlertDispatcher, AlertNotifier, HttpAlertNotifier, LogAlertNotifier,
};
use k1s0_admission_server::infrastructure::random::{SeededRandomSource, ThreadRandomSource};
use k1s0_admission_server::infrastructure::resource_monitor::ResourceMonitor;
use k1s0_admission_server::infrastructure::{database, scheduler, telemetry};
use k1s0_admission_server::usecase;
use k1s0_admission_server::usecase::prune_usage::RetentionWindow;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;

    telemetry::init_logging(&cfg.log)?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting admission server"
    );

    let metrics = Arc::new(AdmissionMetrics::new(&cfg.app.name)?);

    // --- Repository initialization: PostgreSQL → InMemory fallback ---
    let (db_pool, quota_store, sample_repo): (
        Option<Arc<sqlx::PgPool>>,
        Arc<dyn QuotaStore>,
        Arc<dyn SystemSampleRepository>,
    ) = if let Some(ref db_cfg) = cfg.database {
        info!("connecting to PostgreSQL");
        let pool = database::create_pool(db_cfg).await?;
        if db_cfg.run_migrations {
            database::run_migrations(&pool).await?;
            info!("database migrations applied");
        }
        let pool = Arc::new(pool);
        (
            Some(pool.clone()),
            Arc::new(adapter::repository::QuotaStorePostgresRepository::new(
                pool.clone(),
            )),
            Arc::new(adapter::repository::SystemSamplePostgresRepository::new(
                pool,
            )),
        )
    } else {
        tracing::warn!("no database config found, using InMemory repositories (development only)");
        (
            None,
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(InMemorySampleRepository::new()),
        )
    };

    // --- Membership lookup ---
    let membership: Arc<dyn MembershipLookup> = match cfg.membership.service_url {
        Some(ref url) => {
            info!(url = %url, "using membership service");
            let http = HttpMembershipLookup::new(
                url.clone(),
                cfg.membership.default_tier,
                Duration::from_millis(cfg.membership.timeout_ms),
            )?;
            Arc::new(CachedMembershipLookup::new(
                Arc::new(http),
                cfg.membership.cache_max_capacity,
                Duration::from_secs(cfg.membership.cache_ttl_secs),
            ))
        }
        None => {
            info!("no membership service configured, using static membership");
            Arc::new(StaticMembershipLookup::new(
                cfg.membership.default_tier,
                cfg.membership.overrides.clone(),
            ))
        }
    };

    // --- Notification ---
    let notifier: Arc<dyn AlertNotifier> = if cfg.notification.admin_alert_url.is_some()
        || !cfg.notification.webhooks.is_empty()
    {
        Arc::new(HttpAlertNotifier::new(
            cfg.notification.admin_alert_url.clone(),
            Duration::from_millis(cfg.notification.timeout_ms),
        )?)
    } else {
        info!("no notification channel configured, using LogAlertNotifier");
        Arc::new(LogAlertNotifier)
    };
    let dispatcher = AlertDispatcher::new(notifier, cfg.notification.webhooks.clone());

    // --- Resource monitor ---
    let probe = Arc::new(ProcfsProbe::new(
        cfg.monitor.disk_path.clone(),
        db_pool.as_ref().map(|p| p.as_ref().clone()),
    ));
    let monitor = Arc::new(ResourceMonitor::new(
        probe,
        quota_store.clone(),
        sample_repo.clone(),
        cfg.monitor.thresholds,
        dispatcher,
    ));
    monitor.restore().await;

    // --- Use cases ---
    let random: Arc<dyn RandomSource> = match cfg.admission.random_seed {
        Some(seed) => {
            info!(seed, "using seeded random source");
            Arc::new(SeededRandomSource::new(seed))
        }
        None => Arc::new(ThreadRandomSource),
    };
    info!(mode = ?cfg.admission.mode, "admission mode");

    let can_make_request_uc = Arc::new(usecase::CanMakeRequestUseCase::new(
        membership.clone(),
        quota_store.clone(),
        monitor.clone(),
        AdmissionPolicy::new(random),
        cfg.admission.mode,
    ));
    let begin_request_uc = Arc::new(usecase::BeginRequestUseCase::new(
        membership.clone(),
        quota_store.clone(),
    ));
    let record_usage_uc = Arc::new(usecase::RecordUsageUseCase::new(
        membership.clone(),
        quota_store.clone(),
    ));
    let get_user_usage_uc = Arc::new(usecase::GetUserUsageUseCase::new(
        membership,
        quota_store.clone(),
    ));
    let block_user_uc = Arc::new(usecase::BlockUserUseCase::new(quota_store.clone()));
    let unblock_user_uc = Arc::new(usecase::UnblockUserUseCase::new(quota_store.clone()));
    let get_statistics_uc = Arc::new(usecase::GetUsageStatisticsUseCase::new(
        quota_store.clone(),
    ));
    let get_system_status_uc = Arc::new(usecase::GetSystemStatusUseCase::new(
        monitor.clone(),
        sample_repo.clone(),
        cfg.monitor.thresholds,
    ));
    let prune_uc = Arc::new(usecase::PruneUsageUseCase::new(
        quota_store,
        sample_repo,
        RetentionWindow {
            usage_days: cfg.retention.usage_days,
            counter_days: cfg.retention.counter_days,
            sample_days: cfg.retention.sample_days,
        },
    ));

    // --- Background tasks ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_task = tokio::spawn(monitor.clone().run(
        Duration::from_secs(cfg.monitor.interval_secs),
        shutdown_rx.clone(),
    ));
    let metrics_task = tokio::spawn(metrics::track_system_status(
        metrics.clone(),
        monitor.subscribe(),
        shutdown_rx.clone(),
    ));
    let retention_cron = scheduler::parse_schedule(&cfg.retention.schedule)?;
    info!(expression = %cfg.retention.schedule, "retention schedule registered");
    let retention_task = tokio::spawn(scheduler::run_retention_cron(
        retention_cron,
        prune_uc,
        shutdown_rx,
    ));

    let state = adapter::handler::AppState {
        can_make_request_uc,
        begin_request_uc,
        record_usage_uc,
        get_user_usage_uc,
        block_user_uc,
        unblock_user_uc,
        get_statistics_uc,
        get_system_status_uc,
        metrics,
        db_pool,
    };
    let app = adapter::handler::router(state);

    // REST server
    let host: std::net::IpAddr = cfg.server.host.parse()?;
    let rest_addr = SocketAddr::new(host, cfg.server.port);
    info!("REST server starting on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("REST server error: {}", e);
    }

    info!("stopping background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "resource monitor task failed");
    }
    if let Err(e) = retention_task.await {
        tracing::error!(error = %e, "retention task failed");
    }
    if let Err(e) = metrics_task.await {
        tracing::error!(error = %e, "metrics task failed");
    }

    info!("admission server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
