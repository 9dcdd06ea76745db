//! Test media origin.
//!
//! Serves one deterministic payload at every path. Range support and
//! whether the total length is announced are switchable, so a downloader
//! can be driven through each of its request policies.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

/// How the origin behaves.
#[derive(Debug, Clone)]
pub struct OriginOptions {
    /// Bytes served.
    pub payload: Bytes,
    /// Honor `Range` and advertise `Accept-Ranges: bytes`.
    pub ranges: bool,
    /// Announce the total length (`Content-Length`, `Content-Range` total).
    /// When false bodies are chunked and `Content-Range` ends in `/*`.
    pub known_length: bool,
    /// Size of body chunks when the length is unknown.
    pub chunk_size: usize,
}

impl OriginOptions {
    /// Ranges supported, length known.
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            ranges: true,
            known_length: true,
            chunk_size: 4096,
        }
    }

    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    pub fn with_unknown_length(mut self) -> Self {
        self.known_length = false;
        self
    }
}

struct OriginState {
    options: OriginOptions,
    requests: Mutex<Vec<Option<String>>>,
}

/// Test harness serving a payload over HTTP on `127.0.0.1:0`.
///
/// # Example
/// ```rust,ignore
/// let origin = TestOrigin::spawn(OriginOptions::new(payload(1024)).with_unknown_length()).await?;
/// // ... download origin.url() ...
/// assert_eq!(origin.range_headers()[1].as_deref(), Some("bytes=1024-2047"));
/// ```
pub struct TestOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
    _handle: JoinHandle<()>,
}

impl TestOrigin {
    /// Spawn a new origin.
    pub async fn spawn(options: OriginOptions) -> Result<Self, anyhow::Error> {
        let state = Arc::new(OriginState {
            options,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .fallback(serve)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test origin: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test origin error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get the URL of the served media.
    pub fn url(&self) -> String {
        format!("http://{}/media.bin", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `Range` header of every request received, in order.
    pub fn range_headers(&self) -> Vec<Option<String>> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

impl Drop for TestOrigin {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Parse `bytes=start-` or `bytes=start-end`.
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse().ok()?),
    };
    Some((start, end))
}

async fn serve(State(state): State<Arc<OriginState>>, headers: HeaderMap) -> Response {
    let range = headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(range.clone());

    let options = &state.options;
    let total = options.payload.len() as u64;

    let mut response_headers = HeaderMap::new();
    if options.ranges {
        response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }

    let requested = range
        .as_deref()
        .filter(|_| options.ranges)
        .and_then(parse_range);

    let Some((start, end)) = requested else {
        return (
            StatusCode::OK,
            response_headers,
            body(options, options.payload.clone()),
        )
            .into_response();
    };

    let total_label = if options.known_length {
        total.to_string()
    } else {
        "*".to_string()
    };

    // Past the end: an empty slice, which ends a speculative download.
    if start >= total {
        response_headers.insert(
            CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes */{total_label}")).unwrap(),
        );
        return (
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            body(options, Bytes::new()),
        )
            .into_response();
    }

    let end = end.map_or(total - 1, |end| end.min(total - 1));
    let slice = options.payload.slice(start as usize..=end as usize);
    response_headers.insert(
        CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {start}-{end}/{total_label}")).unwrap(),
    );

    (
        StatusCode::PARTIAL_CONTENT,
        response_headers,
        body(options, slice),
    )
        .into_response()
}

/// Fixed-length body, or a chunked one without `Content-Length`.
fn body(options: &OriginOptions, bytes: Bytes) -> Body {
    if options.known_length {
        return Body::from(bytes);
    }

    let chunk_size = options.chunk_size.max(1);
    let chunks: Vec<Result<Bytes, Infallible>> = (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
        .collect();
    Body::from_stream(futures::stream::iter(chunks))
}
