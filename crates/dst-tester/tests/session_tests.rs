//! End-to-end sessions: downloader, buffer and player against a real origin.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::bitrate::Bitrate;
use dst_test_utils::{payload, OriginOptions, TestOrigin};
use dst_tester::{run_session, run_sessions, DownloadError, TesterConfig, TesterError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// 24,000 B/s at 24 fps: 1,000 bytes per frame.
const BITRATE: Bitrate = Bitrate::from_bytes_per_second(24_000);

#[tokio::test]
async fn test_session_plays_whole_payload() {
    let origin = TestOrigin::spawn(OriginOptions::new(payload(30_500)))
        .await
        .unwrap();
    let config = TesterConfig::new(&origin.url(), BITRATE)
        .unwrap()
        .validate()
        .unwrap();

    let summary = run_session(&config, 0, &CancellationToken::new())
        .await
        .unwrap();

    // Whole frames only; the trailing 500 bytes end the stream.
    assert_eq!(summary.frames_played, 30);
}

#[tokio::test]
async fn test_sessions_run_independently() {
    let origin = TestOrigin::spawn(OriginOptions::new(payload(12_000)))
        .await
        .unwrap();
    let config = TesterConfig::new(&origin.url(), BITRATE)
        .unwrap()
        .with_threads(3)
        .validate()
        .unwrap();

    run_sessions(&config, &CancellationToken::new()).await.unwrap();

    // One connection per session.
    assert_eq!(origin.request_count(), 3);
}

#[tokio::test]
async fn test_failed_session_fails_the_group() {
    // Large enough to top the buffer, so the downloader pauses and must
    // reconnect with a range the origin cannot serve.
    let origin = TestOrigin::spawn(OriginOptions::new(payload(200_000)).without_ranges())
        .await
        .unwrap();
    let config = TesterConfig::new(&origin.url(), BITRATE)
        .unwrap()
        .with_threads(2)
        .with_buffer_bounds(1, 1)
        .with_idle_timeout(Duration::ZERO)
        .validate()
        .unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        run_sessions(&config, &CancellationToken::new()),
    )
    .await
    .expect("sessions did not stop")
    .unwrap_err();

    assert!(
        matches!(
            err,
            TesterError::Download(DownloadError::RangesUnsupported)
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_cancel_stops_sessions() {
    let origin = TestOrigin::spawn(OriginOptions::new(payload(1_000_000)))
        .await
        .unwrap();
    // Forty seconds of playback at this bitrate.
    let config = TesterConfig::new(&origin.url(), BITRATE)
        .unwrap()
        .with_threads(2)
        .validate()
        .unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let err = tokio::time::timeout(Duration::from_secs(5), run_sessions(&config, &cancel))
        .await
        .expect("sessions did not stop")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(
        matches!(err, TesterError::Download(DownloadError::Cancelled)),
        "got {err:?}"
    );
}
