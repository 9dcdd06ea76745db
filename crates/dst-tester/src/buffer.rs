//! Playback buffer with hysteresis backpressure.
//!
//! The buffer only counts bytes; the payload itself is discarded. It is
//! split in two halves:
//!
//! - [`BufferSink`] is the producer side. The downloader feeds it through
//!   [`ByteSink`] and gets back [`Demand::Pause`] once the level reaches
//!   the high-water mark. It keeps answering `Pause` until the consumer
//!   drains the level below the low-water mark.
//! - [`Buffer`] is the consumer side. [`Buffer::consume`] either takes the
//!   requested bytes at once or waits until the level reaches the low-water
//!   mark (or the producer terminates).
//!
//! Every pause also wakes a re-arm task that waits for the topped delay and
//! then asks the producer to resume. The re-arm task is owned by the
//! [`Buffer`] and stops when it is dropped.

use crate::config::{TesterConfig, Watermarks};
use crate::downloader::{ByteSink, Demand, Downloader, DownloaderOptions};
use crate::errors::DownloadError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::bitrate::Bitrate;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Whatever fills the buffer.
#[async_trait]
pub trait Producer: Clone + Send + Sync + 'static {
    /// Resume production after a pause. `false` if it was not paused.
    fn resume(&self) -> bool;

    /// Wait for production to end.
    async fn wait_terminal(&self) -> Result<(), DownloadError>;
}

#[async_trait]
impl Producer for Downloader {
    fn resume(&self) -> bool {
        Downloader::resume(self)
    }

    async fn wait_terminal(&self) -> Result<(), DownloadError> {
        Downloader::wait_terminal(self).await
    }
}

/// Result of a successful drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// The requested bytes were taken.
    Frame,
    /// The producer finished and not enough bytes are left.
    EndOfStream,
}

struct Level {
    buffered: u64,
    topped: bool,
    waiter: Option<oneshot::Sender<()>>,
    /// Times the consumer had to wait for data.
    stalls: u64,
}

struct Shared {
    marks: Watermarks,
    level: Mutex<Level>,
    pauses: mpsc::UnboundedSender<()>,
}

impl Shared {
    fn level(&self) -> MutexGuard<'_, Level> {
        self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pause notifications, one per [`Demand::Pause`] answer.
pub struct PauseSignals(mpsc::UnboundedReceiver<()>);

/// Producer-facing half of the buffer.
#[derive(Clone)]
pub struct BufferSink {
    shared: Arc<Shared>,
}

impl BufferSink {
    /// Create an empty buffer sink and the pause signals the consumer half
    /// listens on.
    #[must_use]
    pub fn new(marks: Watermarks) -> (Self, PauseSignals) {
        let (pauses, signals) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            marks,
            level: Mutex::new(Level {
                buffered: 0,
                topped: false,
                waiter: None,
                stalls: 0,
            }),
            pauses,
        });
        (Self { shared }, PauseSignals(signals))
    }

    /// Add `chunk` to the level.
    pub fn accumulate(&self, chunk: &[u8]) -> Demand {
        let marks = self.shared.marks;
        let (waiter, demand) = {
            let mut level = self.shared.level();
            level.buffered = level.buffered.saturating_add(chunk.len() as u64);

            let waiter = if level.buffered >= marks.low {
                level.waiter.take()
            } else {
                None
            };

            if level.buffered >= marks.high {
                level.topped = true;
            }

            let demand = if level.topped {
                Demand::Pause
            } else {
                Demand::More
            };
            (waiter, demand)
        };

        if let Some(waiter) = waiter {
            // The consumer may have stopped waiting (producer terminated).
            let _ = waiter.send(());
        }

        if demand == Demand::Pause {
            debug!(target: "dst.tester.buffer", "Buffer is full, asking to pause download");
            if self.shared.pauses.send(()).is_err() {
                debug!(target: "dst.tester.buffer", "Re-arm task is gone, pause not scheduled");
            }
        }

        demand
    }

    /// Current level in bytes.
    #[must_use]
    pub fn buffered(&self) -> u64 {
        self.shared.level().buffered
    }

    /// Times the consumer had to wait for data so far.
    #[must_use]
    pub fn stalls(&self) -> u64 {
        self.shared.level().stalls
    }
}

impl ByteSink for BufferSink {
    fn accept(&self, chunk: &[u8]) -> Demand {
        self.accumulate(chunk)
    }
}

/// Consumer-facing half of the buffer.
pub struct Buffer<P: Producer> {
    shared: Arc<Shared>,
    producer: P,
    bitrate: Bitrate,
    cancel: CancellationToken,
}

impl Buffer<Downloader> {
    /// Start a downloader for `config.url` feeding a new buffer.
    ///
    /// The downloader is cancelled together with `cancel`, and also when
    /// the returned buffer is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the downloader cannot be started.
    pub fn start(config: &TesterConfig, cancel: &CancellationToken) -> Result<Self, DownloadError> {
        let token = cancel.child_token();
        let (sink, pauses) = BufferSink::new(config.watermarks());

        let options = DownloaderOptions {
            speculative_range: config.speculative_range,
            idle_timeout: config.idle_timeout,
        };
        let downloader = Downloader::start(config.url.clone(), sink.clone(), options, token.clone())?;

        Ok(Self::new(
            &sink,
            pauses,
            downloader,
            config.bitrate,
            config.buffer_topped_delay(),
            token,
        ))
    }
}

impl<P: Producer> Buffer<P> {
    /// Attach a consumer to `sink` and spawn its re-arm task.
    ///
    /// `cancel` is cancelled when the buffer is dropped.
    pub fn new(
        sink: &BufferSink,
        pauses: PauseSignals,
        producer: P,
        bitrate: Bitrate,
        topped_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        tokio::spawn(
            rearm(pauses, producer.clone(), topped_delay, cancel.clone()).in_current_span(),
        );

        Self {
            shared: Arc::clone(&sink.shared),
            producer,
            bitrate,
            cancel,
        }
    }

    /// Take `bytes` from the buffer, waiting for data if needed.
    ///
    /// Returns [`Drain::EndOfStream`] once the producer finished and fewer
    /// than `bytes` remain.
    ///
    /// # Errors
    ///
    /// Returns the producer's terminal error once it failed and fewer than
    /// `bytes` remain.
    pub async fn consume(&mut self, bytes: u64) -> Result<Drain, DownloadError> {
        loop {
            let Some(released) = self.take_or_wait(bytes) else {
                return Ok(Drain::Frame);
            };

            info!(
                target: "dst.tester.buffer",
                buffered = self.buffered(),
                needed = bytes,
                "Can't play, waiting while buffering"
            );
            metrics::record_stall();

            tokio::select! {
                biased;
                _ = released => {
                    info!(target: "dst.tester.buffer", "Continue playing");
                }
                outcome = self.producer.wait_terminal() => {
                    if self.take_or_wait(bytes).is_none() {
                        return Ok(Drain::Frame);
                    }
                    return match outcome {
                        Ok(()) => {
                            info!(target: "dst.tester.buffer", "Can't continue playing because of end of stream");
                            Ok(Drain::EndOfStream)
                        }
                        Err(err) => {
                            error!(target: "dst.tester.buffer", error = %err, "Can't continue playing because of download error");
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Take one frame's worth of bytes at `frame_rate`.
    ///
    /// # Errors
    ///
    /// See [`Buffer::consume`].
    pub async fn next_frame(&mut self, frame_rate: u32) -> Result<Drain, DownloadError> {
        self.consume(self.bitrate.per_frame(frame_rate)).await
    }

    /// Current level in bytes.
    #[must_use]
    pub fn buffered(&self) -> u64 {
        self.shared.level().buffered
    }

    /// Times [`Buffer::consume`] had to wait for data so far.
    #[must_use]
    pub fn stalls(&self) -> u64 {
        self.shared.level().stalls
    }

    /// Take `bytes` if available, otherwise register a waiter released at
    /// the low-water mark.
    fn take_or_wait(&self, bytes: u64) -> Option<oneshot::Receiver<()>> {
        let mut level = self.shared.level();
        if level.buffered >= bytes {
            level.buffered -= bytes;
            if level.buffered < self.shared.marks.low {
                level.topped = false;
            }
            return None;
        }

        let (waiter, released) = oneshot::channel();
        level.waiter = Some(waiter);
        level.stalls += 1;
        Some(released)
    }
}

impl<P: Producer> Drop for Buffer<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resume the producer `delay` after every pause.
async fn rearm<P: Producer>(
    mut pauses: PauseSignals,
    producer: P,
    delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            signal = pauses.0.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        let resumed = producer.resume();
        metrics::record_resume(resumed);
        if !resumed {
            warn!(target: "dst.tester.buffer", "Wanted to resume download, but it is not paused");
        }
    }

    debug!(target: "dst.tester.buffer", "Re-arm task stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    /// Producer driven by the test: counts resumes and terminates on demand.
    #[derive(Clone)]
    struct MockProducer {
        resumes: Arc<AtomicUsize>,
        paused: Arc<Mutex<bool>>,
        terminal: watch::Sender<Option<Result<(), DownloadError>>>,
    }

    impl MockProducer {
        fn new() -> Self {
            let (terminal, _) = watch::channel(None);
            Self {
                resumes: Arc::new(AtomicUsize::new(0)),
                paused: Arc::new(Mutex::new(false)),
                terminal,
            }
        }

        fn pause(&self) {
            *self.paused.lock().unwrap() = true;
        }

        fn terminate(&self, outcome: Result<(), DownloadError>) {
            self.terminal.send_replace(Some(outcome));
        }

        fn resumes(&self) -> usize {
            self.resumes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Producer for MockProducer {
        fn resume(&self) -> bool {
            let mut paused = self.paused.lock().unwrap();
            if *paused {
                *paused = false;
                self.resumes.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }

        async fn wait_terminal(&self) -> Result<(), DownloadError> {
            let mut receiver = self.terminal.subscribe();
            let outcome = receiver
                .wait_for(Option::is_some)
                .await
                .map(|outcome| (*outcome).clone());
            match outcome {
                Ok(Some(outcome)) => outcome,
                _ => Err(DownloadError::Cancelled),
            }
        }
    }

    const MARKS: Watermarks = Watermarks {
        low: 1_000_000,
        high: 2_000_000,
    };

    fn buffer(producer: &MockProducer, delay: Duration) -> (BufferSink, Buffer<MockProducer>) {
        buffer_with_marks(producer, MARKS, delay)
    }

    fn buffer_with_marks(
        producer: &MockProducer,
        marks: Watermarks,
        delay: Duration,
    ) -> (BufferSink, Buffer<MockProducer>) {
        let (sink, pauses) = BufferSink::new(marks);
        let buffer = Buffer::new(
            &sink,
            pauses,
            producer.clone(),
            Bitrate::from_bytes_per_second(1_000_000),
            delay,
            CancellationToken::new(),
        );
        (sink, buffer)
    }

    #[tokio::test]
    async fn test_hysteresis_between_watermarks() {
        let producer = MockProducer::new();
        let (sink, mut buffer) = buffer(&producer, Duration::from_secs(1));

        // 2.1 MB in: reaching high water pauses.
        assert_eq!(sink.accumulate(&vec![0u8; 1_000_000]), Demand::More);
        assert_eq!(sink.accumulate(&vec![0u8; 1_100_000]), Demand::Pause);

        // Drain 600 KB: 1.5 MB left, still between the marks, still paused.
        assert_eq!(buffer.consume(600_000).await.unwrap(), Drain::Frame);
        assert_eq!(buffer.buffered(), 1_500_000);
        assert_eq!(sink.accumulate(&[0u8; 10]), Demand::Pause);

        // Below low water: demand resumes.
        assert_eq!(buffer.consume(600_000).await.unwrap(), Drain::Frame);
        assert_eq!(buffer.buffered(), 900_010);
        assert_eq!(sink.accumulate(&[0u8; 10]), Demand::More);
    }

    #[tokio::test]
    async fn test_consume_returns_immediately_when_available() {
        let producer = MockProducer::new();
        let (sink, mut buffer) = buffer(&producer, Duration::from_secs(1));

        sink.accumulate(&[0u8; 500]);
        assert_eq!(buffer.consume(200).await.unwrap(), Drain::Frame);
        assert_eq!(buffer.consume(300).await.unwrap(), Drain::Frame);
        assert_eq!(buffer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_waiter_released_at_low_water() {
        let producer = MockProducer::new();
        let (sink, mut buffer) = buffer(&producer, Duration::from_secs(1));

        let feeder = tokio::spawn(async move {
            tokio::task::yield_now().await;
            // Below low water: the waiter must stay parked.
            sink.accumulate(&vec![0u8; 500_000]);
            tokio::task::yield_now().await;
            sink.accumulate(&vec![0u8; 500_000]);
            sink
        });

        assert_eq!(buffer.consume(41_666).await.unwrap(), Drain::Frame);
        let sink = feeder.await.unwrap();
        assert_eq!(sink.buffered(), 1_000_000 - 41_666);
    }

    /// Let the consumer task run until it blocks again or finishes.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_release_short_of_request_waits_once_per_accumulate() {
        let producer = MockProducer::new();
        let marks = Watermarks {
            low: 100,
            high: 10_000,
        };
        let (sink, mut buffer) = buffer_with_marks(&producer, marks, Duration::from_secs(1));

        // The request is larger than the low-water mark, so every release
        // below 350 bytes leaves the consumer short.
        let consumer = tokio::spawn(async move {
            let drain = buffer.consume(350).await.unwrap();
            (drain, buffer)
        });
        settle().await;
        assert_eq!(sink.stalls(), 1);

        // Below low water: no release, no extra wait.
        sink.accumulate(&[0u8; 50]);
        settle().await;
        assert_eq!(sink.stalls(), 1);

        // Each release with too few bytes costs exactly one more wait.
        sink.accumulate(&[0u8; 100]);
        settle().await;
        assert_eq!(sink.stalls(), 2);

        sink.accumulate(&[0u8; 100]);
        settle().await;
        assert_eq!(sink.stalls(), 3);

        // Enough bytes: the consumer takes them without waiting again.
        sink.accumulate(&[0u8; 100]);
        let (drain, buffer) = consumer.await.unwrap();
        assert_eq!(drain, Drain::Frame);
        assert_eq!(buffer.stalls(), 3);
        assert_eq!(buffer.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_rearms_after_topped_delay() {
        let producer = MockProducer::new();
        let (sink, _buffer) = buffer(&producer, Duration::from_secs(1));

        producer.pause();
        assert_eq!(sink.accumulate(&vec![0u8; 2_000_000]), Demand::Pause);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(producer.resumes(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(producer.resumes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_on_running_producer_is_harmless() {
        let producer = MockProducer::new();
        let (sink, _buffer) = buffer(&producer, Duration::from_secs(1));

        // Producer not paused: resume reports false and nothing changes.
        sink.accumulate(&vec![0u8; 2_000_000]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(producer.resumes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_rearm() {
        let producer = MockProducer::new();
        let (sink, buffer) = buffer(&producer, Duration::from_secs(1));

        producer.pause();
        sink.accumulate(&vec![0u8; 2_000_000]);
        drop(buffer);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(producer.resumes(), 0);
    }

    #[tokio::test]
    async fn test_end_of_stream_after_finish() {
        let producer = MockProducer::new();
        let (sink, mut buffer) = buffer(&producer, Duration::from_secs(1));

        sink.accumulate(&[0u8; 100]);
        producer.terminate(Ok(()));

        // Remaining bytes still cover one request, then the stream ends.
        assert_eq!(buffer.consume(60).await.unwrap(), Drain::Frame);
        assert_eq!(buffer.consume(60).await.unwrap(), Drain::EndOfStream);
        // A waiter registered after termination still observes it.
        assert_eq!(buffer.consume(60).await.unwrap(), Drain::EndOfStream);
    }

    #[tokio::test]
    async fn test_error_is_propagated_to_consumer() {
        let producer = MockProducer::new();
        let (_sink, mut buffer) = buffer(&producer, Duration::from_secs(1));

        producer.terminate(Err(DownloadError::BadStatus(503)));

        assert_eq!(
            buffer.consume(1).await.unwrap_err(),
            DownloadError::BadStatus(503)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_level_is_consistent_under_concurrency() {
        let producer = MockProducer::new();
        let marks = Watermarks {
            low: 100,
            high: u64::MAX,
        };
        let (sink, mut buffer) = buffer_with_marks(&producer, marks, Duration::from_secs(1));

        let mut feeders = Vec::new();
        for _ in 0..4 {
            let sink = sink.clone();
            feeders.push(tokio::spawn(async move {
                for _ in 0..1_000 {
                    sink.accumulate(&[0u8; 100]);
                    tokio::task::yield_now().await;
                }
            }));
        }

        // Total in: 400,000. Take 1,000 x 150 = 150,000 concurrently.
        for _ in 0..1_000 {
            assert_eq!(buffer.consume(150).await.unwrap(), Drain::Frame);
        }
        for feeder in feeders {
            feeder.await.unwrap();
        }

        assert_eq!(buffer.buffered(), 250_000);
    }
}
