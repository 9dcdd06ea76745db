//! Tester error types.
//!
//! [`DownloadError`] is the terminal error of a downloader. It is `Clone`
//! because it lives inside the published download state and is handed to
//! every observer (buffer, player, session runner) that asks for it.

use crate::config::ConfigError;
use thiserror::Error;

/// Terminal downloader failure.
///
/// Every variant is permanent: a failed downloader never resumes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// A new request was needed after partial consumption, but the remote
    /// does not support byte ranges.
    #[error("Cannot continue download because ranges are not supported")]
    RangesUnsupported,

    /// The remote answered with a non-2xx status.
    #[error("Bad status code: {0}")]
    BadStatus(u16),

    /// The request could not be sent (connect, DNS, TLS, client build).
    #[error("Request failed: {0}")]
    Request(String),

    /// Reading the response body failed mid-stream.
    #[error("Error reading body: {0}")]
    Body(String),

    /// The session was cancelled externally.
    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether this is a protocol-capability failure rather than a transport one.
    #[must_use]
    pub fn is_capability_error(&self) -> bool {
        matches!(self, DownloadError::RangesUnsupported)
    }

    /// Short bounded label, used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::RangesUnsupported => "ranges_unsupported",
            DownloadError::BadStatus(_) => "bad_status",
            DownloadError::Request(_) => "request",
            DownloadError::Body(_) => "body",
            DownloadError::Cancelled => "cancelled",
        }
    }
}

/// Session-level failure reported to the process boundary.
#[derive(Debug, Error)]
pub enum TesterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    /// A session task panicked or was aborted.
    #[error("Session task failed: {0}")]
    TaskFailed(String),
}
