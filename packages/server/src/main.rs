use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::storage::FilesystemUploadStore;
use media::FfmpegTranscoder;
use mq::MqPublisher;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use plaza::cache::Cache;
use plaza::config::AppConfig;
use plaza::database::init_db;
use plaza::events::EventEmitter;
use plaza::hub::Hub;
use plaza::seed::ensure_indexes;
use plaza::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    ensure_indexes(&db)
        .await
        .context("Failed to create indexes")?;
    info!("Database ready");

    let store = FilesystemUploadStore::new(
        config.storage.static_root.clone(),
        config.storage.max_upload_size,
    )
    .await
    .context("Failed to prepare static root")?;
    info!(root = %config.storage.static_root.display(), "Upload store ready");

    let events = if config.mq.enabled {
        let publisher = MqPublisher::connect(&config.mq)
            .await
            .context("Failed to initialize MQ")?;
        info!(url = %config.mq.url, prefix = %config.mq.topic_prefix, "Event bus connected");
        EventEmitter::new(Arc::new(publisher))
    } else {
        info!("Event bus disabled");
        EventEmitter::disabled()
    };

    let cache = Arc::new(Cache::new(Duration::from_secs(config.cache.ttl_secs)));
    let purge_cache = cache.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let purged = purge_cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Expired cache entries removed");
            }
        }
    });

    let (hub, scheduler) = Hub::new(cache.clone());
    let hub_task = tokio::spawn(scheduler.run());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState {
        db,
        transcoder: Arc::new(FfmpegTranscoder::new(config.media.clone())),
        config: Arc::new(config),
        hub: hub.clone(),
        cache,
        store: Arc::new(store),
        events,
    };
    let app = plaza::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);
    info!("API docs at http://{}/scalar", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    if let Err(e) = hub_task.await {
        warn!(error = %e, "Chat hub task ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM and stop the chat hub so open sockets close.
async fn shutdown_signal(hub: Hub) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
    hub.stop();
}
