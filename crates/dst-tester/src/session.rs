//! Playback sessions.
//!
//! A session is one downloader, one buffer and one player for the
//! configured URL. [`run_sessions`] runs `threads` independent sessions and
//! treats them as a group: the first failure cancels the rest.

use crate::buffer::Buffer;
use crate::config::TesterConfig;
use crate::errors::{DownloadError, TesterError};
use crate::player::{PlaybackSummary, Player};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Run a single session to completion.
///
/// # Errors
///
/// Returns the session's download error, or [`DownloadError::Cancelled`]
/// once `cancel` fires.
pub async fn run_session(
    config: &TesterConfig,
    index: usize,
    cancel: &CancellationToken,
) -> Result<PlaybackSummary, TesterError> {
    play(config, cancel)
        .instrument(info_span!("session", index))
        .await
}

async fn play(
    config: &TesterConfig,
    cancel: &CancellationToken,
) -> Result<PlaybackSummary, TesterError> {
    info!(target: "dst.tester.session", url = %config.url, "Starting filling buffer");
    let buffer = Buffer::start(config, cancel)?;

    let summary = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(DownloadError::Cancelled.into()),
        summary = Player::new(buffer).run() => summary?,
    };

    info!(
        target: "dst.tester.session",
        frames_played = summary.frames_played,
        stalls = summary.stalls,
        "Session finished"
    );
    Ok(summary)
}

/// Run `config.threads` sessions concurrently.
///
/// # Errors
///
/// Returns the first session failure. Remaining sessions are cancelled.
pub async fn run_sessions(config: &TesterConfig, cancel: &CancellationToken) -> Result<(), TesterError> {
    info!(
        target: "dst.tester.session",
        url = %config.url,
        bitrate = %config.bitrate,
        threads = config.threads,
        buffer_min_seconds = config.buffer_min_seconds,
        buffer_max_seconds = config.buffer_max_seconds,
        buffer_topped_delay_seconds = config.buffer_topped_delay_seconds,
        speculative_range = config.speculative_range,
        "Starting tester"
    );

    if config.threads <= 1 {
        return run_session(config, 0, cancel).await.map(|_| ());
    }

    let group = cancel.child_token();
    let mut sessions = JoinSet::new();
    for index in 0..config.threads {
        let config = config.clone();
        let group = group.clone();
        sessions.spawn(async move { run_session(&config, index, &group).await });
    }

    let mut first_error = None;
    while let Some(joined) = sessions.join_next().await {
        let result = joined
            .map_err(|e| TesterError::TaskFailed(e.to_string()))
            .and_then(|session| session.map(|_| ()));

        if let Err(err) = result {
            if first_error.is_none() {
                warn!(target: "dst.tester.session", error = %err, "Session failed, cancelling the others");
                group.cancel();
                first_error = Some(err);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}
