//! HTTP routes for the stream server.
//!
//! Defines the Axum router and application state.

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::generator::{ByteSource, Generator, Pacing};
use crate::responder;
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across all requests.
pub struct AppState {
    /// Pacing applied to every stream.
    pub pacing: Pacing,

    /// Cyclic seed shared by all streams, if configured.
    pub seed: Option<Bytes>,

    /// Cancelled when the server shuts down; ends every open stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state for `config`, drawing the cyclic seed if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed cannot be generated.
    pub fn new(config: &ServerConfig, shutdown: CancellationToken) -> Result<Self, ServerError> {
        let seed = match config.random_bytes {
            0 => None,
            size => Some(ByteSource::generate_seed(size)?),
        };

        Ok(Self {
            pacing: Pacing::for_bitrate(config.bitrate),
            seed,
            shutdown,
        })
    }

    /// A fresh generator for one response, starting at offset zero.
    #[must_use]
    pub fn generator(&self) -> Generator {
        let source = match &self.seed {
            Some(seed) => ByteSource::cyclic(seed.clone()),
            None => ByteSource::entropy(),
        };
        Generator::new(source, self.pacing)
    }
}

/// Build the application routes.
///
/// Every path and method streams bytes; there is nothing else to route.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(responder::stream_bytes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::bitrate::Bitrate;

    #[test]
    fn test_state_without_seed_uses_entropy() {
        let config = ServerConfig::new(8080).unwrap();
        let state = AppState::new(&config, CancellationToken::new()).unwrap();
        assert!(state.seed.is_none());
        assert_eq!(state.pacing, Pacing::Unlimited);
    }

    #[test]
    fn test_state_with_seed_and_bitrate() {
        let config = ServerConfig::new(8080)
            .unwrap()
            .with_bitrate(Some(Bitrate::from_bytes_per_second(2_400)))
            .with_random_bytes(32)
            .unwrap();
        let state = AppState::new(&config, CancellationToken::new()).unwrap();

        assert_eq!(state.seed.as_ref().map(Bytes::len), Some(32));
        assert_eq!(state.pacing.chunk_size(), 100);
    }

    #[test]
    fn test_each_generator_starts_at_seed_start() {
        let config = ServerConfig::new(8080)
            .unwrap()
            .with_bitrate(Some(Bitrate::from_bytes_per_second(240)))
            .with_random_bytes(16)
            .unwrap();
        let state = AppState::new(&config, CancellationToken::new()).unwrap();

        let first = state.generator().next_chunk().unwrap();
        let second = state.generator().next_chunk().unwrap();
        assert_eq!(first, second);
    }
}
