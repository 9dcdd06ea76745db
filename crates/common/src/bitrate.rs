//! Target bitrate shared by the tester and the server.
//!
//! Bitrates are written on the command line as an integer followed by a
//! `k`, `m` or `g` suffix meaning kibi-, mebi- or gibi-*bits* per second
//! (`8m` is 8 Mibit/s). Internally everything works in *bytes* per second,
//! because the downloader, buffer and generator all count bytes.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a bitrate string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitrateError {
    /// The string does not end with a known unit suffix.
    #[error("bitrate must end with k, m or g")]
    MissingSuffix,

    /// The part before the suffix is not an integer.
    #[error("bitrate must be integer with suffix k, m or g")]
    NotAnInteger,

    /// Zero or negative bitrate.
    #[error("bitrate must be positive")]
    NotPositive,

    /// The value does not fit in 64 bits once converted to bytes.
    #[error("bitrate is too large")]
    Overflow,
}

/// Bitrate in bytes (not bits) per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bitrate(u64);

impl Bitrate {
    /// Create a bitrate from a raw bytes-per-second value.
    #[must_use]
    pub const fn from_bytes_per_second(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Bytes per second.
    #[must_use]
    pub const fn bytes_per_second(self) -> u64 {
        self.0
    }

    /// Bytes needed for a single frame at `frame_rate` frames per second.
    ///
    /// Integer division: 800,000 B/s at 24 fps is 33,333 bytes per frame.
    /// A zero frame rate yields zero.
    #[must_use]
    pub const fn per_frame(self, frame_rate: u32) -> u64 {
        if frame_rate == 0 {
            return 0;
        }
        self.0 / frame_rate as u64
    }

    /// Bytes covering `seconds` of playback, saturating at `u64::MAX`.
    #[must_use]
    pub const fn over_seconds(self, seconds: u64) -> u64 {
        self.0.saturating_mul(seconds)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B/s", self.0)
    }
}

impl FromStr for Bitrate {
    type Err = BitrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();

        let (digits, multiplier) = if let Some(rest) = text.strip_suffix('k') {
            (rest, 1u64 << 10)
        } else if let Some(rest) = text.strip_suffix('m') {
            (rest, 1u64 << 20)
        } else if let Some(rest) = text.strip_suffix('g') {
            (rest, 1u64 << 30)
        } else {
            return Err(BitrateError::MissingSuffix);
        };

        let value: i64 = digits.parse().map_err(|_| BitrateError::NotAnInteger)?;
        if value <= 0 {
            return Err(BitrateError::NotPositive);
        }

        let bits = value
            .unsigned_abs()
            .checked_mul(multiplier)
            .ok_or(BitrateError::Overflow)?;

        Ok(Self(bits / 8))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!("8k".parse::<Bitrate>().unwrap().bytes_per_second(), 1024);
        assert_eq!(
            "8m".parse::<Bitrate>().unwrap().bytes_per_second(),
            1024 * 1024
        );
        assert_eq!(
            "1g".parse::<Bitrate>().unwrap().bytes_per_second(),
            (1024 * 1024 * 1024) / 8
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "16M".parse::<Bitrate>().unwrap(),
            "16m".parse::<Bitrate>().unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_missing_suffix() {
        assert_eq!(
            "1000".parse::<Bitrate>(),
            Err(BitrateError::MissingSuffix)
        );
        assert_eq!("".parse::<Bitrate>(), Err(BitrateError::MissingSuffix));
    }

    #[test]
    fn test_parse_rejects_non_integer() {
        assert_eq!("1.5m".parse::<Bitrate>(), Err(BitrateError::NotAnInteger));
        assert_eq!("m".parse::<Bitrate>(), Err(BitrateError::NotAnInteger));
    }

    #[test]
    fn test_parse_rejects_non_positive() {
        assert_eq!("0k".parse::<Bitrate>(), Err(BitrateError::NotPositive));
        assert_eq!("-4m".parse::<Bitrate>(), Err(BitrateError::NotPositive));
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert_eq!(
            "9223372036854775807g".parse::<Bitrate>(),
            Err(BitrateError::Overflow)
        );
    }

    #[test]
    fn test_per_frame_uses_integer_division() {
        let bitrate = Bitrate::from_bytes_per_second(800_000);
        assert_eq!(bitrate.per_frame(24), 33_333);
        assert_eq!(bitrate.per_frame(0), 0);
    }

    #[test]
    fn test_over_seconds_saturates() {
        let bitrate = Bitrate::from_bytes_per_second(1_000_000);
        assert_eq!(bitrate.over_seconds(2), 2_000_000);
        assert_eq!(
            Bitrate::from_bytes_per_second(u64::MAX).over_seconds(2),
            u64::MAX
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Bitrate::from_bytes_per_second(125).to_string(),
            "125 B/s"
        );
    }
}
