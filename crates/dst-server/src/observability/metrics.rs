//! Metrics definitions for the stream server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `dst_server_` prefix
//! - `_total` suffix for counters
//!
//! Labels are bounded: `outcome` is one of `client_gone`, `source_failed`,
//! `shutdown`.

use crate::generator::StreamEnd;
use metrics::{counter, gauge};

/// Record a stream starting.
///
/// Metrics: `dst_server_streams_started_total`, `dst_server_active_streams`
pub fn record_stream_started() {
    counter!("dst_server_streams_started_total").increment(1);
    gauge!("dst_server_active_streams").increment(1.0);
}

/// Record a stream ending.
///
/// Metrics: `dst_server_streams_finished_total`, `dst_server_bytes_served_total`,
/// `dst_server_active_streams`
/// Labels: `outcome`
pub fn record_stream_finished(end: StreamEnd, bytes_written: u64) {
    counter!("dst_server_streams_finished_total", "outcome" => outcome_label(end)).increment(1);
    counter!("dst_server_bytes_served_total").increment(bytes_written);
    gauge!("dst_server_active_streams").decrement(1.0);
}

fn outcome_label(end: StreamEnd) -> &'static str {
    match end {
        StreamEnd::ClientGone => "client_gone",
        StreamEnd::SourceFailed => "source_failed",
        StreamEnd::Shutdown => "shutdown",
    }
}
