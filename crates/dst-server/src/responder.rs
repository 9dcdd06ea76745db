//! Per-request stream handler.
//!
//! Every request gets `200 OK`, `Accept-Ranges: bytes` and an endless body
//! from a fresh [`Generator`](crate::generator::Generator). A requested
//! range is ignored: each response starts at offset zero.

use crate::generator::{StreamEnd, StreamSummary};
use crate::observability::metrics;
use crate::routes::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT_RANGES, CONTENT_TYPE, RANGE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use common::types::RequestId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info_span, warn, Instrument};

/// Stream synthetic bytes until the client disconnects.
pub async fn stream_bytes(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let request_id = RequestId::generate().unwrap_or_else(|e| {
        error!(target: "dst.server.responder", error = %e, "Failed to generate random request ID");
        RequestId::placeholder()
    });
    let span = info_span!("request", request_id = %request_id);

    span.in_scope(|| {
        debug!(target: "dst.server.responder", "Start responding to a new request");
        if let Some(range) = headers.get(RANGE) {
            debug!(
                target: "dst.server.responder",
                range = ?range,
                "Ignoring requested range, streaming from offset zero"
            );
        }
    });

    // One chunk in flight: the generator never runs ahead of the socket.
    let (tx, rx) = mpsc::channel(1);
    let generator = state.generator();
    let shutdown = state.shutdown.clone();

    metrics::record_stream_started();
    tokio::spawn(
        async move {
            let summary = generator.run(tx, shutdown).await;
            log_summary(summary);
            metrics::record_stream_finished(summary.end, summary.bytes_written);
        }
        .instrument(span),
    );

    (
        [
            (ACCEPT_RANGES, "bytes"),
            (CONTENT_TYPE, "application/octet-stream"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

fn log_summary(summary: StreamSummary) {
    let bytes_written = summary.bytes_written;
    match summary.end {
        StreamEnd::ClientGone => {
            warn!(target: "dst.server.responder", bytes_written, "Error writing response: client went away");
        }
        StreamEnd::SourceFailed => {
            error!(target: "dst.server.responder", bytes_written, "Aborted response because the byte source failed");
        }
        StreamEnd::Shutdown => {
            debug!(target: "dst.server.responder", bytes_written, "Finished responding to the request");
        }
    }
}
