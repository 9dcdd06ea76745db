//! Listener setup and graceful shutdown.

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::routes::{self, AppState};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serve until `shutdown` resolves, then end all open streams and drain.
///
/// # Errors
///
/// Returns an error if the seed cannot be generated, the address cannot be
/// bound, or the server fails while running.
pub async fn run<F>(config: &ServerConfig, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let streams = CancellationToken::new();
    let state = Arc::new(AppState::new(config, streams.clone())?);
    let app = routes::build_routes(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(
        target: "dst.server",
        %addr,
        bitrate = config.bitrate.map(|b| b.bytes_per_second()),
        random_bytes = config.random_bytes,
        "Listen for connections"
    );

    // Open streams never end on their own; cancel them so the graceful
    // shutdown can complete.
    let stop = async move {
        shutdown.await;
        streams.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await
        .map_err(ServerError::Serve)?;

    info!(target: "dst.server", "Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!(target: "dst.server", "Received SIGINT, starting graceful shutdown"),
            Err(e) => {
                error!(target: "dst.server", error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(target: "dst.server", "Received SIGTERM, starting graceful shutdown");
            }
            Err(e) => {
                error!(target: "dst.server", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
