use metrics_exporter_prometheus::PrometheusBuilder;
use relist_worker::{
    app_state::AppState,
    browser::{chromium::ChromiumLauncher, manager::BrowserManager},
    config::WorkerConfig,
    db,
    platforms::MarketplaceProcessors,
    routes::{self, health::HealthState},
    services::{
        accounts::PgAccountStore,
        encryption::EncryptionService,
        events::{JobEventLogger, PgEventSink},
        images::ImageStager,
        processor::JobProcessor,
        queue::PgJobQueue,
        vault::PgCredentialVault,
        worker::{Worker, WorkerLoopConfig},
    },
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting listing automation worker");

    let config = WorkerConfig::from_env().expect("Failed to load configuration");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let encryption = EncryptionService::with_previous_keys(&config.encryption_key, &config.previous_keys())
        .expect("Failed to initialize encryption");

    let timeouts = config.automation_timeouts();
    let browsers = Arc::new(BrowserManager::new(Arc::new(ChromiumLauncher::new(
        config.headless,
        config.chrome_executable.clone(),
        timeouts.navigation,
    ))));

    // The engine is launched up front so a missing or broken browser stops
    // the process instead of failing every job.
    if let Err(e) = browsers.get_or_create_engine().await {
        tracing::error!(error = %e, "Browser engine could not be started");
        std::process::exit(1);
    }

    let images = ImageStager::new(config.staging_root()).expect("Failed to initialize image staging");

    let state = AppState {
        queue: Arc::new(PgJobQueue::new(db_pool.clone())),
        events: JobEventLogger::new(Arc::new(PgEventSink::new(db_pool.clone()))),
        vault: Arc::new(PgCredentialVault::new(db_pool.clone(), Arc::new(encryption))),
        accounts: Arc::new(PgAccountStore::new(db_pool.clone())),
        browsers: browsers.clone(),
        processors: Arc::new(MarketplaceProcessors::new(timeouts)),
        images: Arc::new(images),
    };

    let processor = Arc::new(JobProcessor::new(state.clone()));
    let worker = Arc::new(Worker::new(
        state.queue.clone(),
        processor,
        WorkerLoopConfig::from(&config),
    ));

    let app = routes::router(
        HealthState {
            db: db_pool.clone(),
            browsers: browsers.clone(),
            worker: worker.clone(),
        },
        prometheus_handle,
    );
    let listener = tokio::net::TcpListener::bind(&config.health_bind_addr)
        .await
        .expect("Failed to bind health listener");
    tracing::info!("Health endpoint listening on {}", config.health_bind_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Health server stopped");
        }
    });

    tracing::info!("Worker ready, starting job polling loop");
    worker.run(shutdown_signal()).await;

    browsers.shutdown().await;
    tracing::info!(
        abandoned_jobs = ?worker.in_flight_jobs(),
        "Worker shut down"
    );
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
