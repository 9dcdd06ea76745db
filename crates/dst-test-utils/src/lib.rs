//! # dst Test Utilities
//!
//! Shared test harnesses for the tester and the stream server.
//!
//! This crate provides:
//! - `TestOrigin`: a media origin with switchable range support and
//!   known/unknown content length, recording every `Range` header
//! - `TestStreamServer`: the real stream server router on a random port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dst_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let origin = TestOrigin::spawn(OriginOptions::new(payload(4096))).await?;
//!     let response = reqwest::get(origin.url()).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod origin;
pub mod stream_server;

// Re-export commonly used items
pub use origin::*;
pub use stream_server::*;
