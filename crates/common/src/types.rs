//! Common data types for dst components.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use thiserror::Error;

/// Number of random bytes behind a request id.
const REQUEST_ID_BYTES: usize = 8;

/// Placeholder used when the CSPRNG fails to produce a request id.
pub const REQUEST_ID_PLACEHOLDER: &str = "rnd-failed";

/// The system CSPRNG refused to produce bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Failed to generate random request id")]
pub struct RequestIdError;

/// Identifier attached to every server request for log correlation.
///
/// Eight random bytes rendered as URL-safe base64.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request id.
    ///
    /// # Errors
    ///
    /// Returns [`RequestIdError`] if the system CSPRNG fails.
    pub fn generate() -> Result<Self, RequestIdError> {
        let mut bytes = [0u8; REQUEST_ID_BYTES];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| RequestIdError)?;
        Ok(Self(URL_SAFE.encode(bytes)))
    }

    /// The id used when generation failed.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(REQUEST_ID_PLACEHOLDER.to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_url_safe_base64() {
        let id = RequestId::generate().unwrap();
        // 8 bytes -> 12 base64 characters including padding
        assert_eq!(id.as_str().len(), 12);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn test_generate_is_random() {
        let a = RequestId::generate().unwrap();
        let b = RequestId::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(RequestId::placeholder().to_string(), REQUEST_ID_PLACEHOLDER);
    }
}
