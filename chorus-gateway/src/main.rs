//! Chorus chat gateway service.
//!
//! # Environment Variables
//!
//! - `REDIS_URL`: bus connection string (default: redis://localhost:6379/0)
//! - `INGEST_STREAM` / `FIREHOSE_STREAM`: stream names
//! - `CONSUMER_GROUP` / `CONSUMER_NAME`: consumer-group identity
//! - `MODERATION_CONFIG_PATH`: optional moderation config JSON
//! - `CONTENT_MAX_LENGTH`: max chat line length (default: 200)
//! - `HTTP_HOST` / `HTTP_PORT`: bind address (default: 0.0.0.0:8080)

use chorus_bus::{BusTransport, RedisBus};
use chorus_core::safety::SafetyFilter;
use chorus_gateway::{router, AppState, GatewaySettings, GatewayStats, IngestPump, WsManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus_gateway=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = GatewaySettings::from_env();
    tracing::info!(
        ingest = %settings.ingest_stream,
        firehose = %settings.firehose_stream,
        group = %settings.consumer_group,
        "starting chat gateway"
    );

    let safety = match &settings.moderation_config_path {
        Some(path) => match SafetyFilter::from_config_file(settings.content_max_chars, path) {
            Ok(filter) => filter,
            Err(e) => {
                // Configuration errors are fatal; a gateway without its
                // moderation policy must not broadcast.
                tracing::error!(error = %e, "failed to load moderation config");
                std::process::exit(1);
            }
        },
        None => SafetyFilter::new(settings.content_max_chars),
    };

    let transport: Arc<dyn BusTransport> = match RedisBus::new(&settings.redis_url) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            tracing::error!(error = %e, "invalid bus configuration");
            std::process::exit(1);
        }
    };

    let ws = Arc::new(WsManager::new(settings.client_queue_size));
    let stats = Arc::new(GatewayStats::default());
    let pump = Arc::new(IngestPump::new(
        transport.clone(),
        safety,
        ws.clone(),
        stats.clone(),
        &settings.ingest_stream,
        &settings.firehose_stream,
        &settings.consumer_group,
        &settings.consumer_name,
        settings.dedupe_cache_size,
    ));

    let cancel = CancellationToken::new();
    let pump_task = {
        let pump = pump.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = pump.run(cancel).await {
                tracing::error!(error = %e, "ingest pump failed");
                std::process::exit(1);
            }
        })
    };

    let state = AppState {
        ws,
        stats,
        transport,
        default_room: settings.default_room.clone(),
        subscribe_timeout: Duration::from_secs(settings.subscribe_timeout_s),
    };
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .expect("invalid host:port combination");
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), pump_task).await;
    tracing::info!("gateway shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
