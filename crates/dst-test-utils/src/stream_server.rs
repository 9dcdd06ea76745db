//! Test harness for the stream server.

use common::bitrate::Bitrate;
use dst_server::config::ServerConfig;
use dst_server::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns the real stream server router on `127.0.0.1:0`.
///
/// # Example
/// ```rust,ignore
/// let server = TestStreamServer::spawn(None, 0).await?;
/// let response = reqwest::get(server.url()).await?;
/// assert_eq!(response.headers()["accept-ranges"], "bytes");
/// ```
pub struct TestStreamServer {
    addr: SocketAddr,
    streams: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestStreamServer {
    /// Spawn a server pacing at `bitrate` (unpaced if `None`) with a cyclic
    /// seed of `random_bytes` bytes (live entropy if `0`).
    pub async fn spawn(bitrate: Option<Bitrate>, random_bytes: usize) -> Result<Self, anyhow::Error> {
        // The port is replaced by the listener below; config only needs a valid one.
        let config = ServerConfig::new(1)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?
            .with_bitrate(bitrate)
            .with_random_bytes(random_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let streams = CancellationToken::new();
        let state = AppState::new(&config, streams.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create state: {}", e))?;
        let app = routes::build_routes(Arc::new(state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test stream server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            streams,
            _handle: handle,
        })
    }

    /// Get the URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}/stream", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// End every open stream, as a server shutdown would.
    pub fn end_streams(&self) {
        self.streams.cancel();
    }
}

impl Drop for TestStreamServer {
    fn drop(&mut self) {
        self.streams.cancel();
        self._handle.abort();
    }
}
