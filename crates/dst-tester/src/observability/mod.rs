//! Observability for the tester.

pub mod metrics;
