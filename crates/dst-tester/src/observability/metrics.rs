//! Metrics definitions for the tester.
//!
//! All metrics follow Prometheus naming conventions:
//! - `dst_tester_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `kind`: `initial`, `ranged`
//! - `outcome`: `finished` or a [`DownloadError::kind`] value
//! - `result`: `resumed`, `not_paused`
//!
//! Nothing is exported unless the binary installs a recorder; without one
//! every call here is a no-op.
//!
//! [`DownloadError::kind`]: crate::errors::DownloadError::kind

use metrics::counter;

// ============================================================================
// Downloader
// ============================================================================

/// Metric: `dst_tester_downloaded_bytes_total`
pub fn record_bytes_downloaded(bytes: u64) {
    counter!("dst_tester_downloaded_bytes_total").increment(bytes);
}

/// Metric: `dst_tester_requests_total`
/// Labels: `kind` (initial, ranged)
pub fn record_request(ranged: bool) {
    let kind = if ranged { "ranged" } else { "initial" };
    counter!("dst_tester_requests_total", "kind" => kind).increment(1);
}

/// Metric: `dst_tester_download_outcomes_total`
/// Labels: `outcome`
pub fn record_download_outcome(outcome: &'static str) {
    counter!("dst_tester_download_outcomes_total", "outcome" => outcome).increment(1);
}

/// Metric: `dst_tester_pauses_total`
pub fn record_pause() {
    counter!("dst_tester_pauses_total").increment(1);
}

/// Metric: `dst_tester_resumes_total`
/// Labels: `result` (resumed, not_paused)
///
/// `not_paused` counts the benign race where the re-arm task fires after
/// the downloader already resumed or terminated.
pub fn record_resume(resumed: bool) {
    let result = if resumed { "resumed" } else { "not_paused" };
    counter!("dst_tester_resumes_total", "result" => result).increment(1);
}

// ============================================================================
// Playback
// ============================================================================

/// Metric: `dst_tester_playback_stalls_total`
pub fn record_stall() {
    counter!("dst_tester_playback_stalls_total").increment(1);
}

/// Metric: `dst_tester_frames_played_total`
pub fn record_frame() {
    counter!("dst_tester_frames_played_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without a recorder installed these only exercise the call paths.

    #[test]
    fn test_record_downloader_metrics() {
        record_bytes_downloaded(16 * 1024);
        record_request(false);
        record_request(true);
        record_download_outcome("finished");
        record_download_outcome("cancelled");
        record_pause();
        record_resume(true);
        record_resume(false);
    }

    #[test]
    fn test_record_playback_metrics() {
        record_stall();
        record_frame();
    }
}
