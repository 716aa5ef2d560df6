use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::info;

use orderflow_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    // Production always logs structured JSON; elsewhere it is opt-in.
    api::config::init_tracing(cfg.log_level(), cfg.log_json || cfg.is_production());

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    let db = Arc::new(db_pool);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let services = api::handlers::AppServices::new(db.clone(), Arc::new(event_sender.clone()), &cfg);
    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };

    api::handlers::health::init_start_time();
    let app = api::app_router(state);

    let addr: SocketAddr = cfg
        .server_addr()
        .parse()
        .with_context(|| format!("invalid server address {}", cfg.server_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, environment = %cfg.environment, "orderflow-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
