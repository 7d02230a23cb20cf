//! Chorus persona worker service.
//!
//! # Environment Variables
//!
//! - `REDIS_URL`, `FIREHOSE_STREAM`, `INGEST_STREAM`, `STREAM_OBSERVATIONS_KEY`
//! - `ROOM_CONFIG_PATH`, `PERSONA_CONFIG_DIR`
//! - `GENERATION_MODE` (`deterministic` | `stub` | `litellm`)
//! - `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_MODEL` (live generation)
//! - `AUTO_COMMENTARY_ENABLED`, `AUTO_COMMENTARY_CONFIG_PATH`
//! - `MEMORY_ENABLED`, `MEMORY_FIXTURES_PATH`, `MEMORY_EXTRACT_STRATEGY`
//! - `HTTP_HOST` / `HTTP_PORT` (default: 0.0.0.0:8090)

use chorus_bus::{BusTransport, RedisBus};
use chorus_core::config::{load_persona_configs, load_room_config};
use chorus_core::SystemClock;
use chorus_llm::{build_provider, ProviderSettings};
use chorus_memory::{InMemoryStore, MemoryAdapter, MemoryPolicy, MemoryStore};
use chorus_worker::reflection::run_reflection;
use chorus_worker::{
    AutoCommentaryConfig, MemoryPipeline, PersonaWorkerService, WorkerSettings,
};
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
                .unwrap_or_else(|_| "chorus_worker=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = WorkerSettings::from_env();

    // Configuration errors are the only fatal startup errors.
    let room = match load_room_config(&settings.room_config_path) {
        Ok(room) => room,
        Err(e) => {
            tracing::error!(error = %e, "failed to load room config");
            std::process::exit(1);
        }
    };
    let personas = match load_persona_configs(&settings.persona_config_dir, &room.enabled_personas)
    {
        Ok(personas) => personas,
        Err(e) => {
            tracing::error!(error = %e, "failed to load persona configs");
            std::process::exit(1);
        }
    };
    tracing::info!(
        room_id = %room.room_id,
        personas = personas.len(),
        mode = settings.generation_mode.as_str(),
        "starting persona worker"
    );

    let provider = match build_provider(
        settings.generation_mode,
        &ProviderSettings {
            fixtures_path: settings.generation_fixtures_path.clone(),
            prompt_manifest_path: settings.prompt_manifest_path.clone(),
            base_url: settings.llm_base_url.clone(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
            timeout_ms: None,
            max_concurrency: Some(settings.max_llm_concurrency),
        },
    ) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!(error = %e, "failed to build reply provider");
            std::process::exit(1);
        }
    };

    let memory = if settings.memory_enabled {
        let store: Arc<dyn MemoryStore> = match &settings.memory_fixtures_path {
            Some(path) => match InMemoryStore::from_fixture_file(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "memory fixtures failed to load; starting empty");
                    Arc::new(InMemoryStore::new())
                }
            },
            None => Arc::new(InMemoryStore::new()),
        };
        let adapter = Arc::new(MemoryAdapter::new(store, MemoryPolicy::default()));
        Some(Arc::new(MemoryPipeline::new(
            adapter,
            provider.clone(),
            settings.memory_extract_strategy,
            settings.memory_scope_user_enabled,
            settings.memory_max_items,
            settings.memory_max_chars,
        )))
    } else {
        None
    };

    let auto_cfg = match &settings.auto_commentary_config_path {
        Some(path) => match AutoCommentaryConfig::load(path, settings.auto_commentary_enabled) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "failed to load auto commentary config");
                std::process::exit(1);
            }
        },
        None => AutoCommentaryConfig {
            enabled: settings.auto_commentary_enabled,
            ..Default::default()
        },
    };

    let transport: Arc<dyn BusTransport> = match RedisBus::new(&settings.redis_url) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            tracing::error!(error = %e, "invalid bus configuration");
            std::process::exit(1);
        }
    };

    let grace_s = settings.grace_s;
    let host = settings.host.clone();
    let port = settings.port;
    let service = Arc::new(PersonaWorkerService::new(
        settings,
        room,
        personas,
        auto_cfg,
        transport,
        provider,
        memory,
        Arc::new(SystemClock),
    ));

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    {
        let service = service.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = service.run_reactive(cancel).await {
                tracing::error!(error = %e, "reactive loop failed");
                std::process::exit(1);
            }
        }));
    }
    {
        let service = service.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = service.run_auto(cancel).await {
                tracing::error!(error = %e, "auto loop failed");
                std::process::exit(1);
            }
        }));
    }
    {
        let service = service.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(run_reflection(service, cancel)));
    }

    let app = chorus_worker::http::router(service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let addr: SocketAddr = format!("{host}:{port}")
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

    // Let in-flight generations finish, then cancel the rest.
    cancel.cancel();
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(grace_s), drain)
        .await
        .is_err()
    {
        tracing::warn!("shutdown grace period elapsed with tasks still running");
    }
    tracing::info!("worker shutdown complete");
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
