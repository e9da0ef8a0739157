use anyhow::Context;
use scribed::config::Config;
use scribed::events::EventBus;
use scribed::jobs::{HealthMonitor, Processor};
use scribed::providers::{LocalProvider, ProviderRegistry};
use scribed::server::{self, AppState};
use scribed::storage::database::DatabaseManager;
use scribed::storage::repositories::{ChunkRepository, JobRepository, SubmissionRepository};
use scribed::stream::hub::{StreamHub, StreamSettings};
use scribed::stream::stt::{SttConnector, WsSttConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    tokio::fs::create_dir_all(&config.storage.uploads_dir)
        .await
        .context("creating uploads directory")?;

    let database = Arc::new(
        DatabaseManager::new(&config.database)
            .await
            .context("initializing database")?,
    );

    let jobs = JobRepository::new(database.pool().clone());
    let submissions = SubmissionRepository::new(database.pool().clone(), jobs.clone());
    let chunks = ChunkRepository::new(database.pool().clone());
    let events = Arc::new(EventBus::new(jobs.clone()));

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(
        LocalProvider::new(config.provider.clone()).context("building local provider")?,
    ));
    let providers = Arc::new(providers);

    let stt: Arc<dyn SttConnector> = Arc::new(WsSttConnector::new(
        config.provider.stt_ws_url.clone(),
        config.provider.stt_api_key.clone(),
    ));

    let hub = StreamHub::new(
        jobs.clone(),
        chunks.clone(),
        submissions.clone(),
        events.clone(),
        stt,
        StreamSettings {
            max_viewers: config.stream.max_viewers,
            min_words_for_analysis: config.stream.min_words_for_analysis,
            utterance_end_ms: config.stream.utterance_end_ms,
            sample_rate_hz: config.stream.sample_rate_hz,
            uploads_dir: config.storage.uploads_dir.clone(),
        },
    );

    let processor = Processor::new(
        jobs.clone(),
        submissions.clone(),
        providers,
        events.clone(),
        hub.clone(),
        Duration::from_millis(config.processing.poll_interval_ms),
    );
    processor.start();

    let monitor = HealthMonitor::new(
        jobs,
        submissions,
        events.clone(),
        Duration::from_millis(config.processing.stuck_check_interval_ms),
    );
    monitor.start();

    let state = AppState {
        hub,
        events,
        database: database.clone(),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Listening on {}", config.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Drain in-flight work before closing the pool
    processor.shutdown().await;
    monitor.shutdown().await;
    database.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
