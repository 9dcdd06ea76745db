//! Range-aware, pausable HTTP downloader.
//!
//! A [`Downloader`] streams one URL into a [`ByteSink`] over a single
//! connection at a time. The sink decides after every chunk whether to keep
//! going ([`Demand::More`]) or to pause ([`Demand::Pause`]). A paused
//! downloader parks its session (the open response body, unread bytes and
//! the consumed offset) until [`Downloader::resume`] is called.
//!
//! On resume the parked body is reused when it is still fresh. Otherwise
//! the download continues with a `Range` request from the consumed offset:
//! up to the end of the content when its length is known, or a speculative
//! window of [`DownloaderOptions::speculative_range`] bytes when it is not.
//! A speculative window that comes back non-empty is followed by the next
//! window; an empty one ends the download.
//!
//! # State
//!
//! ```text
//!            pause                    resume
//! Running ----------> Paused ------------------> Running
//!    |                  |
//!    | eof / error      | cancel
//!    v                  v
//! Finished | Failed(DownloadError)      (terminal, never left)
//! ```
//!
//! The state is published on a `watch` channel so any number of observers
//! can wait for the terminal transition.

use crate::errors::DownloadError;
use crate::observability::metrics;
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of bytes handed to the sink in one call.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Default speculative window when the content length is unknown (100 MiB).
pub const DEFAULT_SPECULATIVE_RANGE: u64 = 100 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

// =============================================================================
// Sink
// =============================================================================

/// What the sink wants after accepting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    More,
    Pause,
}

/// Receiver of downloaded bytes.
///
/// Called from the downloader task only, sequentially, with chunks of at
/// most [`READ_CHUNK_SIZE`] bytes.
pub trait ByteSink: Send + Sync + 'static {
    fn accept(&self, chunk: &[u8]) -> Demand;
}

impl<F> ByteSink for F
where
    F: Fn(&[u8]) -> Demand + Send + Sync + 'static,
{
    fn accept(&self, chunk: &[u8]) -> Demand {
        self(chunk)
    }
}

// =============================================================================
// Public state and options
// =============================================================================

/// Observable downloader state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Running,
    Paused,
    Finished,
    Failed(DownloadError),
}

impl DownloadState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Finished | DownloadState::Failed(_))
    }
}

/// Downloader tuning.
#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    /// Window size for range requests when the content length is unknown.
    pub speculative_range: u64,

    /// A response body parked for longer than this is dropped on resume
    /// and the download continues with a range request. `None` always
    /// reuses the parked body.
    pub idle_timeout: Option<Duration>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            speculative_range: DEFAULT_SPECULATIVE_RANGE,
            idle_timeout: None,
        }
    }
}

impl DownloaderOptions {
    #[must_use]
    pub fn with_speculative_range(mut self, bytes: u64) -> Self {
        self.speculative_range = bytes;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

// =============================================================================
// Range policy
// =============================================================================

/// What the remote told us on the latest response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteInfo {
    pub ranges_supported: bool,
    /// Total length of the content, when the remote reported it.
    pub content_length: Option<u64>,
}

impl RemoteInfo {
    /// Derive remote capabilities from a response's status and headers.
    ///
    /// `body_length` is the response's own `Content-Length`. For a 206 it
    /// is the length of the slice, so the total comes from `Content-Range`.
    #[must_use]
    pub fn from_parts(status: StatusCode, headers: &HeaderMap, body_length: Option<u64>) -> Self {
        let advertised = headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));

        if status == StatusCode::PARTIAL_CONTENT {
            let content_length = headers
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(content_range_total);
            return Self {
                ranges_supported: true,
                content_length,
            };
        }

        Self {
            ranges_supported: advertised,
            content_length: body_length,
        }
    }

    fn from_response(response: &Response) -> Self {
        Self::from_parts(
            response.status(),
            response.headers(),
            response.content_length(),
        )
    }
}

/// Total length from a `Content-Range: bytes a-b/total` value.
///
/// `None` for `*` or anything unparseable.
#[must_use]
pub fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().split_once('/')?;
    total.trim().parse().ok()
}

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// The next request a (re)opening downloader should issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRequest {
    /// Plain GET, nothing consumed yet.
    Full,
    /// GET with a `Range` header.
    Ranged(ByteRange),
    /// Everything the remote announced has been consumed.
    Complete,
    /// Bytes were consumed but the remote cannot serve a range.
    Unsupported,
}

/// Decide the next request from the consumed offset and what the remote
/// last reported.
#[must_use]
pub fn next_request(consumed: u64, remote: Option<&RemoteInfo>, speculative_range: u64) -> NextRequest {
    let Some(remote) = remote.filter(|_| consumed > 0) else {
        return NextRequest::Full;
    };

    if !remote.ranges_supported {
        return NextRequest::Unsupported;
    }

    match remote.content_length {
        Some(length) if consumed >= length => NextRequest::Complete,
        Some(length) => NextRequest::Ranged(ByteRange {
            start: consumed,
            end: length - 1,
        }),
        None => NextRequest::Ranged(ByteRange {
            start: consumed,
            end: consumed.saturating_add(speculative_range.max(1) - 1),
        }),
    }
}

// =============================================================================
// Downloader
// =============================================================================

/// An open response body and the bytes read from it but not yet delivered.
struct OpenBody {
    response: Response,
    pending: Bytes,
    ranged: bool,
    /// Bytes delivered from this response.
    received: u64,
    parked_at: Option<Instant>,
}

impl OpenBody {
    fn new(response: Response, ranged: bool) -> Self {
        Self {
            response,
            pending: Bytes::new(),
            ranged,
            received: 0,
            parked_at: None,
        }
    }

    fn is_stale(&self, idle_timeout: Option<Duration>) -> bool {
        match (self.parked_at, idle_timeout) {
            (Some(parked_at), Some(timeout)) => parked_at.elapsed() > timeout,
            _ => false,
        }
    }
}

/// Everything a read loop needs to continue where the previous one stopped.
#[derive(Default)]
struct FetchSession {
    consumed: u64,
    remote: Option<RemoteInfo>,
    body: Option<OpenBody>,
}

/// Internal state. `Paused` owns the parked session so a resume can only
/// ever hand it to exactly one new read loop.
enum Phase {
    Running,
    Paused(FetchSession),
    Terminal,
}

enum ReadOutcome {
    Paused(OpenBody),
    Eof(OpenBody),
    Failed(DownloadError),
}

struct Inner {
    url: Url,
    client: Client,
    sink: Box<dyn ByteSink>,
    options: DownloaderOptions,
    cancel: CancellationToken,
    phase: Mutex<Phase>,
    state: watch::Sender<DownloadState>,
    consumed: AtomicU64,
    /// Set by a resume that lands between the sink's `Pause` and the park.
    /// Only written or tested under the `phase` lock, except for the reset
    /// before every sink call.
    resume_requested: AtomicBool,
    span: Span,
}

/// Handle to a running download. Cheap to clone.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    /// Start downloading `url` into `sink`.
    ///
    /// The read loop and a cancellation watcher are spawned immediately in
    /// the caller's span. Cancelling `cancel` fails the download with
    /// [`DownloadError::Cancelled`] unless it already terminated.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Request`] if the HTTP client cannot be built.
    pub fn start(
        url: Url,
        sink: impl ByteSink,
        options: DownloaderOptions,
        cancel: CancellationToken,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::Request(format!("Failed to build HTTP client: {e}")))?;

        let (state, _) = watch::channel(DownloadState::Running);

        let inner = Arc::new(Inner {
            url,
            client,
            sink: Box::new(sink),
            options,
            cancel,
            phase: Mutex::new(Phase::Running),
            state,
            consumed: AtomicU64::new(0),
            resume_requested: AtomicBool::new(false),
            span: Span::current(),
        });

        tokio::spawn(watch_cancellation(Arc::clone(&inner)).instrument(inner.span.clone()));
        tokio::spawn(read_loop(Arc::clone(&inner), FetchSession::default()).instrument(inner.span.clone()));

        Ok(Self { inner })
    }

    /// Resume a paused download.
    ///
    /// Returns `false` unless the downloader is currently paused. A resume
    /// that arrives while the read loop is still on its way to pausing
    /// withdraws that pause, so it is never lost.
    pub fn resume(&self) -> bool {
        let session = {
            let mut phase = lock(&self.inner.phase);
            match std::mem::replace(&mut *phase, Phase::Running) {
                Phase::Paused(session) => {
                    self.inner.publish(DownloadState::Running);
                    session
                }
                Phase::Running => {
                    self.inner.resume_requested.store(true, Ordering::SeqCst);
                    return false;
                }
                Phase::Terminal => {
                    *phase = Phase::Terminal;
                    return false;
                }
            }
        };

        debug!(target: "dst.tester.downloader", consumed = session.consumed, "Resuming download");
        tokio::spawn(read_loop(Arc::clone(&self.inner), session).instrument(self.inner.span.clone()));
        true
    }

    /// Wait until the download is finished or failed.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of a failed download.
    pub async fn wait_terminal(&self) -> Result<(), DownloadError> {
        let mut receiver = self.inner.state.subscribe();
        let state = receiver
            .wait_for(DownloadState::is_terminal)
            .await
            .map(|state| (*state).clone());

        match state {
            Ok(DownloadState::Failed(err)) => Err(err),
            Ok(_) => Ok(()),
            // The sender lives in `inner`, which we hold.
            Err(_) => Err(DownloadError::Cancelled),
        }
    }

    /// The terminal error, if the download failed.
    #[must_use]
    pub fn current_error(&self) -> Option<DownloadError> {
        match &*self.inner.state.borrow() {
            DownloadState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.inner.state.borrow().clone()
    }

    /// Total bytes handed to the sink so far.
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.inner.consumed.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn publish(&self, state: DownloadState) {
        self.state.send_replace(state);
    }

    /// Park the session.
    ///
    /// Hands the session back when a resume arrived after the sink asked to
    /// pause; the caller keeps reading. A cancellation that won the race
    /// keeps the terminal state and the session is dropped.
    fn park(&self, mut session: FetchSession) -> Option<FetchSession> {
        let mut phase = lock(&self.phase);
        if !matches!(*phase, Phase::Running) {
            return None;
        }

        if self.resume_requested.swap(false, Ordering::SeqCst) {
            debug!(target: "dst.tester.downloader", consumed = session.consumed, "Resumed before pausing, continuing download");
            return Some(session);
        }

        debug!(target: "dst.tester.downloader", consumed = session.consumed, "Pausing download");
        metrics::record_pause();
        if let Some(body) = session.body.as_mut() {
            body.parked_at = Some(Instant::now());
        }
        *phase = Phase::Paused(session);
        self.publish(DownloadState::Paused);
        None
    }

    fn finish(&self, consumed: u64) {
        let mut phase = lock(&self.phase);
        if matches!(*phase, Phase::Terminal) {
            return;
        }
        *phase = Phase::Terminal;
        self.publish(DownloadState::Finished);
        drop(phase);

        info!(target: "dst.tester.downloader", bytes = consumed, "Download complete");
        metrics::record_download_outcome("finished");
    }

    fn fail(&self, err: DownloadError) {
        let mut phase = lock(&self.phase);
        if matches!(*phase, Phase::Terminal) {
            return;
        }
        *phase = Phase::Terminal;
        self.publish(DownloadState::Failed(err.clone()));
        drop(phase);

        let bytes = self.consumed.load(Ordering::Relaxed);
        if err == DownloadError::Cancelled {
            info!(target: "dst.tester.downloader", bytes, "Download cancelled");
        } else {
            error!(target: "dst.tester.downloader", error = %err, bytes, "Stopping downloader because of error");
        }
        metrics::record_download_outcome(err.kind());
    }

    /// Issue the next request for `session`.
    ///
    /// `Ok(None)` means there is nothing left to request.
    async fn open(&self, session: &mut FetchSession) -> Result<Option<OpenBody>, DownloadError> {
        let range = match next_request(
            session.consumed,
            session.remote.as_ref(),
            self.options.speculative_range,
        ) {
            NextRequest::Full => None,
            NextRequest::Ranged(range) => Some(range),
            NextRequest::Complete => return Ok(None),
            NextRequest::Unsupported => return Err(DownloadError::RangesUnsupported),
        };

        let mut request = self.client.get(self.url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        debug!(
            target: "dst.tester.downloader",
            url = %self.url,
            range = ?range.map(|r| r.header_value()),
            "Making request"
        );
        metrics::record_request(range.is_some());

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response.map_err(|e| DownloadError::Request(e.to_string()))?,
        };

        let remote = RemoteInfo::from_response(&response);
        session.remote = Some(remote);

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::BadStatus(status.as_u16()));
        }

        debug!(
            target: "dst.tester.downloader",
            status = status.as_u16(),
            ranges_supported = remote.ranges_supported,
            content_length = remote.content_length,
            "Got response"
        );

        Ok(Some(OpenBody::new(response, range.is_some())))
    }

    /// Deliver `body` to the sink until it pauses, ends or fails.
    async fn read_body(&self, session: &mut FetchSession, mut body: OpenBody) -> ReadOutcome {
        loop {
            if body.pending.is_empty() {
                let next = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return ReadOutcome::Failed(DownloadError::Cancelled),
                    next = body.response.chunk() => next,
                };
                match next {
                    Ok(Some(bytes)) => body.pending = bytes,
                    Ok(None) => return ReadOutcome::Eof(body),
                    Err(e) => return ReadOutcome::Failed(DownloadError::Body(e.to_string())),
                }
                continue;
            }

            let take = body.pending.len().min(READ_CHUNK_SIZE);
            let chunk = body.pending.split_to(take);
            let len = chunk.len() as u64;

            session.consumed += len;
            body.received += len;
            self.consumed.store(session.consumed, Ordering::Relaxed);
            metrics::record_bytes_downloaded(len);

            // Only a resume issued from here on can withdraw a pause.
            self.resume_requested.store(false, Ordering::SeqCst);
            if self.sink.accept(&chunk) == Demand::Pause {
                return ReadOutcome::Paused(body);
            }
        }
    }
}

/// One read loop owns the session from start (or resume) until it parks
/// it or reaches a terminal state.
async fn read_loop(inner: Arc<Inner>, mut session: FetchSession) {
    loop {
        let body = match session.body.take() {
            Some(body) if !body.is_stale(inner.options.idle_timeout) => body,
            parked => {
                if parked.is_some() {
                    debug!(target: "dst.tester.downloader", "Releasing idle response body");
                }
                match inner.open(&mut session).await {
                    Ok(Some(body)) => body,
                    Ok(None) => {
                        inner.finish(session.consumed);
                        return;
                    }
                    Err(err) => {
                        inner.fail(err);
                        return;
                    }
                }
            }
        };

        match inner.read_body(&mut session, body).await {
            ReadOutcome::Paused(body) => {
                session.body = Some(body);
                match inner.park(session) {
                    Some(resumed) => session = resumed,
                    None => return,
                }
            }
            ReadOutcome::Eof(body) => {
                let length_unknown = !session
                    .remote
                    .is_some_and(|remote| remote.content_length.is_some());

                if body.ranged && length_unknown && body.received > 0 {
                    debug!(
                        target: "dst.tester.downloader",
                        received = body.received,
                        "Speculative range exhausted, requesting next range"
                    );
                    continue;
                }

                inner.finish(session.consumed);
                return;
            }
            ReadOutcome::Failed(err) => {
                inner.fail(err);
                return;
            }
        }
    }
}

/// Fail a non-terminal downloader when its token is cancelled. This is
/// what ends a download that is parked with no read loop running.
async fn watch_cancellation(inner: Arc<Inner>) {
    let mut receiver = inner.state.subscribe();
    tokio::select! {
        () = inner.cancel.cancelled() => inner.fail(DownloadError::Cancelled),
        _ = receiver.wait_for(DownloadState::is_terminal) => {}
    }
}
