//! Download stress tester.
//!
//! Emulates adaptive-bitrate playback against a media URL: a
//! [`downloader::Downloader`] fills a [`buffer::Buffer`] that a
//! [`player::Player`] drains at the target bitrate. The buffer pauses the
//! downloader between its watermarks so the connection sees the stop-start
//! pattern of a real player.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod observability;
pub mod player;
pub mod session;

pub use config::TesterConfig;
pub use errors::{DownloadError, TesterError};
pub use session::{run_session, run_sessions};
