//! Server configuration.

use common::bitrate::Bitrate;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Default address to listen on (all interfaces).
pub const DEFAULT_BIND_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Upper bound on the cyclic seed, which is held in memory.
pub const MAX_RANDOM_BYTES: usize = 1024 * 1024 * 1024;

/// Configuration error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be in 1..=65535")]
    InvalidPort,

    #[error("random bytes must be <= {MAX_RANDOM_BYTES} (got {0})")]
    RandomBytesTooLarge(usize),
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host to listen on.
    pub bind_host: IpAddr,

    /// Pace every stream at this rate. `None` streams as fast as possible.
    pub bitrate: Option<Bitrate>,

    /// Size of the cyclic random seed. `0` draws live entropy per chunk.
    pub random_bytes: usize,
}

impl ServerConfig {
    /// Create a configuration listening on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] for port 0.
    pub fn new(port: u16) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(Self {
            port,
            bind_host: DEFAULT_BIND_HOST,
            bitrate: None,
            random_bytes: 0,
        })
    }

    #[must_use]
    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    #[must_use]
    pub fn with_bitrate(mut self, bitrate: Option<Bitrate>) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the cyclic seed size.
    ///
    /// # Errors
    ///
    /// Returns an error above [`MAX_RANDOM_BYTES`].
    pub fn with_random_bytes(mut self, random_bytes: usize) -> Result<Self, ConfigError> {
        if random_bytes > MAX_RANDOM_BYTES {
            return Err(ConfigError::RandomBytesTooLarge(random_bytes));
        }
        self.random_bytes = random_bytes;
        Ok(self)
    }

    #[must_use]
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new(8080).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.bitrate, None);
        assert_eq!(config.random_bytes, 0);
    }

    #[test]
    fn test_rejects_port_zero() {
        assert_eq!(ServerConfig::new(0).unwrap_err(), ConfigError::InvalidPort);
    }

    #[test]
    fn test_bind_host_ipv6() {
        let config = ServerConfig::new(9000)
            .unwrap()
            .with_bind_host("::1".parse().unwrap());
        assert_eq!(config.bind_address().to_string(), "[::1]:9000");
    }

    #[test]
    fn test_random_bytes_limit() {
        let config = ServerConfig::new(9000).unwrap();
        assert_eq!(
            config.clone().with_random_bytes(MAX_RANDOM_BYTES + 1).unwrap_err(),
            ConfigError::RandomBytesTooLarge(MAX_RANDOM_BYTES + 1)
        );
        assert_eq!(config.with_random_bytes(4096).unwrap().random_bytes, 4096);
    }
}
