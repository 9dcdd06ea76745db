//! Rate-paced synthetic byte generator.
//!
//! A [`Generator`] produces the body of one response. With a bitrate it
//! emits one chunk of `bitrate / 24` bytes every 1/24 s; without one it
//! emits [`UNPACED_CHUNK_SIZE`] chunks as fast as the connection drains
//! them. Chunks are filled from a [`ByteSource`]: live entropy, or a
//! precomputed random seed repeated cyclically so throughput does not
//! depend on how fast the system CSPRNG is.
//!
//! Each chunk becomes its own body frame, and hyper writes every frame to
//! the socket as it arrives. A paced stream is therefore flushed once per
//! tick, and no separate periodic flush is needed.
//!
//! Two chunk buffers alternate. While one chunk is in flight to the
//! client the other is refilled, and each buffer's allocation is reused
//! once the connection has written the chunk out.

use crate::errors::GeneratorError;
use bytes::{Bytes, BytesMut};
use common::bitrate::Bitrate;
use ring::rand::{SecureRandom, SystemRandom};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Ticks per second of a paced stream.
pub const FRAME_RATE: u32 = 24;

/// Chunk size of an unpaced stream.
pub const UNPACED_CHUNK_SIZE: usize = 16 * 1024;

/// Where chunk bytes come from.
pub enum ByteSource {
    Entropy(SystemRandom),
    Cyclic { seed: Bytes, offset: usize },
}

impl ByteSource {
    #[must_use]
    pub fn entropy() -> Self {
        ByteSource::Entropy(SystemRandom::new())
    }

    /// Repeat `seed` from its first byte.
    #[must_use]
    pub fn cyclic(seed: Bytes) -> Self {
        ByteSource::Cyclic { seed, offset: 0 }
    }

    /// Draw `size` bytes of entropy for a cyclic seed.
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError::Entropy`] if the CSPRNG fails.
    pub fn generate_seed(size: usize) -> Result<Bytes, GeneratorError> {
        let mut seed = vec![0u8; size];
        SystemRandom::new()
            .fill(&mut seed)
            .map_err(|_| GeneratorError::Entropy)?;
        Ok(Bytes::from(seed))
    }

    fn fill(&mut self, out: &mut [u8]) -> Result<(), GeneratorError> {
        match self {
            ByteSource::Entropy(rng) => rng.fill(out).map_err(|_| GeneratorError::Entropy),
            ByteSource::Cyclic { seed, offset } => fill_cyclic(seed, offset, out),
        }
    }
}

/// Copy `seed` into `out` starting at `offset`, wrapping around.
fn fill_cyclic(seed: &[u8], offset: &mut usize, out: &mut [u8]) -> Result<(), GeneratorError> {
    if seed.is_empty() {
        return Err(GeneratorError::EmptySeed);
    }

    let mut rest = out;
    while !rest.is_empty() {
        let tail = seed.get(*offset..).unwrap_or_default();
        let n = tail.len().min(rest.len());
        let (head, remaining) = std::mem::take(&mut rest).split_at_mut(n);
        let (source, _) = tail.split_at(n);
        head.copy_from_slice(source);

        rest = remaining;
        *offset = (*offset + n) % seed.len();
    }
    Ok(())
}

/// How chunks are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// `chunk_size` bytes every `period`.
    Paced { chunk_size: usize, period: Duration },
    /// Fixed-size chunks with no delay.
    Unlimited,
}

impl Pacing {
    /// Pacing for an optional target bitrate.
    ///
    /// Bitrates below one byte per tick still send one byte per tick.
    #[must_use]
    pub fn for_bitrate(bitrate: Option<Bitrate>) -> Self {
        match bitrate {
            None => Pacing::Unlimited,
            Some(bitrate) => Pacing::Paced {
                chunk_size: usize::try_from(bitrate.per_frame(FRAME_RATE))
                    .unwrap_or(usize::MAX)
                    .max(1),
                period: Duration::from_secs(1) / FRAME_RATE,
            },
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        match self {
            Pacing::Paced { chunk_size, .. } => *chunk_size,
            Pacing::Unlimited => UNPACED_CHUNK_SIZE,
        }
    }
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The client went away (the response body was dropped).
    ClientGone,
    /// The byte source failed; the connection was aborted.
    SourceFailed,
    /// The server is shutting down.
    Shutdown,
}

/// Outcome of [`Generator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    /// Bytes handed to the connection.
    pub bytes_written: u64,
}

pub struct Generator {
    source: ByteSource,
    pacing: Pacing,
    front: BytesMut,
    back: BytesMut,
}

impl Generator {
    #[must_use]
    pub fn new(source: ByteSource, pacing: Pacing) -> Self {
        let size = pacing.chunk_size();
        Self {
            source,
            pacing,
            front: BytesMut::with_capacity(size),
            back: BytesMut::with_capacity(size),
        }
    }

    /// Fill and hand out the next chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte source fails.
    pub fn next_chunk(&mut self) -> Result<Bytes, GeneratorError> {
        self.front.resize(self.pacing.chunk_size(), 0);
        self.source.fill(&mut self.front)?;
        let chunk = self.front.split().freeze();
        std::mem::swap(&mut self.front, &mut self.back);
        Ok(chunk)
    }

    /// Stream chunks into `sink` until the receiver is dropped, the source
    /// fails, or `shutdown` is cancelled.
    ///
    /// A source failure is forwarded as an `Err` item so the HTTP body is
    /// aborted rather than ended cleanly.
    pub async fn run(
        mut self,
        sink: mpsc::Sender<Result<Bytes, io::Error>>,
        shutdown: CancellationToken,
    ) -> StreamSummary {
        let mut ticker = match self.pacing {
            Pacing::Paced { period, .. } => {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(ticker)
            }
            Pacing::Unlimited => None,
        };

        let mut bytes_written = 0u64;

        loop {
            // One chunk per tick; hyper flushes each body frame on its own.
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return StreamSummary { end: StreamEnd::Shutdown, bytes_written },
                    _ = ticker.tick() => {}
                }
            }

            let chunk = match self.next_chunk() {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!(target: "dst.server.generator", error = %e, "Error reading from random source");
                    // The body is being torn down either way.
                    let _ = sink.send(Err(io::Error::other(e))).await;
                    return StreamSummary { end: StreamEnd::SourceFailed, bytes_written };
                }
            };
            let len = chunk.len() as u64;

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return StreamSummary { end: StreamEnd::Shutdown, bytes_written },
                sent = sink.send(Ok(chunk)) => {
                    if sent.is_err() {
                        return StreamSummary { end: StreamEnd::ClientGone, bytes_written };
                    }
                }
            }
            bytes_written += len;
        }
    }
}
