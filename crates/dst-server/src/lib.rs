//! Synthetic byte stream server.
//!
//! Answers every request with an endless stream of random bytes, paced at
//! a configured bitrate or unpaced. Used as the origin for load tests when
//! real media is not needed.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod generator;
pub mod observability;
pub mod responder;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use errors::ServerError;
