use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_notify::config::Config;
use exchange_notify::routes;
use exchange_notify::services::{
    init, ContentRegistry, EventEmitter, NotificationService, QueueProcessor,
};
use exchange_notify::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exchange_notify=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting exchange notification service");

    let pool = init::init_db(&config).await?;

    let content = ContentRegistry::with_defaults();
    if let Err(e) = init::validate_content_registry(&pool, &content).await {
        tracing::warn!("Could not validate content registry against event catalog: {:?}", e);
    }

    let notifications =
        NotificationService::new(pool.clone(), content, config.queue.default_max_attempts);
    let (emitter, emit_rx) = EventEmitter::channel();

    let senders = init::build_senders(&config, &pool);
    let processor = QueueProcessor::new(
        pool.clone(),
        senders,
        config.queue.batch_size,
        Duration::from_secs(config.queue.send_timeout_seconds.max(1)),
    );

    let app_state = Arc::new(AppState {
        db: pool,
        notifications: notifications.clone(),
        emitter,
    });

    // Shutdown notifier for background workers
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let bg_handles = init::spawn_background_workers(
        &config,
        notifications,
        emit_rx,
        processor,
        &shutdown_tx,
    );

    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(frontend_origin)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::ACCEPT,
                    http::HeaderName::from_static(routes::USER_ID_HEADER),
                ]),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(listener, app);

    let shutdown_tx_clone = shutdown_tx.clone();
    let signal_fut = async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, notifying background workers");
        let _ = shutdown_tx_clone.send(());
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Server stopped accepting new connections");
        }
    }

    // Server errors also end the process; make sure workers hear about it.
    let _ = shutdown_tx.send(());

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, bg_wait).await.is_err() {
        tracing::warn!("Background workers did not exit in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, listening for Ctrl+C only: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
