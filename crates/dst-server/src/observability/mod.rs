//! Observability for the stream server.

pub mod metrics;
