//! Edge process entry point (spec.md §4.1): loads config, runs migrations,
//! and serves the tracking pixel over HTTP until `SIGINT`/`SIGTERM`.

use std::net::SocketAddr;
use tracepixel::config::Config;
use tracepixel::edge::{server, EdgeState};
use tracepixel::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::load("tracepixel.toml")?;
    let ch = store::client_from_url(&config.store_connection)?;
    store::run_migrations(&ch).await?;

    let state = EdgeState::new(config, ch).await?;
    let app = server::build_router(state);

    let addr: SocketAddr = std::env::var("TRACEPIXEL_EDGE_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    tracing::info!("edge listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
    tracing::info!("edge: shutdown signal received, draining in-flight requests");
}
