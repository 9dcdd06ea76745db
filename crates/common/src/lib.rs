//! Common utilities and types shared across dst components.

#![warn(clippy::pedantic)]

/// Module for the bitrate type used by both tester and server
pub mod bitrate;

/// Module for logging setup and log configuration
pub mod observability;

/// Module for common data types
pub mod types;
