//! Paced playback emulator.
//!
//! Drains one frame's worth of bytes from the buffer, then sleeps one frame
//! period, until the stream ends or the download fails.

use crate::buffer::{Buffer, Drain, Producer};
use crate::errors::DownloadError;
use crate::observability::metrics;
use std::time::Duration;
use tracing::{info, instrument};

/// Frames per second of the emulated playback.
pub const DEFAULT_FRAME_RATE: u32 = 24;

/// What a finished playback achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub frames_played: u64,
    /// Times playback had to wait for the buffer.
    pub stalls: u64,
}

pub struct Player<P: Producer> {
    buffer: Buffer<P>,
    frame_rate: u32,
}

impl<P: Producer> Player<P> {
    #[must_use]
    pub fn new(buffer: Buffer<P>) -> Self {
        Self {
            buffer,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Override the frame rate (zero is treated as one).
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    /// Play until end of stream.
    ///
    /// # Errors
    ///
    /// Returns the download's terminal error if it failed.
    #[instrument(skip_all, name = "dst.tester.player.run", fields(frame_rate = self.frame_rate))]
    pub async fn run(mut self) -> Result<PlaybackSummary, DownloadError> {
        let frame_period = Duration::from_secs(1) / self.frame_rate;
        let mut frames_played = 0u64;

        info!(target: "dst.tester.player", "Starting playback");

        loop {
            match self.buffer.next_frame(self.frame_rate).await? {
                Drain::Frame => {
                    frames_played += 1;
                    metrics::record_frame();
                    tokio::time::sleep(frame_period).await;
                }
                Drain::EndOfStream => {
                    let stalls = self.buffer.stalls();
                    info!(target: "dst.tester.player", frames_played, stalls, "Playback finished");
                    return Ok(PlaybackSummary {
                        frames_played,
                        stalls,
                    });
                }
            }
        }
    }
}
