//! Key codec for the persistent event store.
//!
//! Keys are ASCII decimal so that the byte-ordered key space of the backing
//! engine sorts them numerically, and so that a raw key dump stays readable.
//!
//! # Layout
//!
//! ```text
//! 00000000001700000000.0000000003
//! |------ seconds ----| |- seq --|
//!      20 digits      .  10 digits
//! ```
//!
//! Seconds are the event timestamp truncated to whole epoch seconds. The
//! sequence restarts at zero for every new second and counts further writes
//! inside the same second, so two events stamped in the same second never
//! share a key.

use chrono::{DateTime, Utc};

use crate::error::{CodecError, Result};

/// Number of digits in the seconds part (`u64::MAX` has 20).
pub const SECONDS_WIDTH: usize = 20;

/// Number of digits in the sequence part (`u32::MAX` has 10).
pub const SEQUENCE_WIDTH: usize = 10;

/// Separator between seconds and sequence.
const SEPARATOR: u8 = b'.';

/// Total encoded key length in bytes.
pub const KEY_LEN: usize = SECONDS_WIDTH + 1 + SEQUENCE_WIDTH;

/// Truncates a timestamp to whole epoch seconds.
///
/// Instants before the Unix epoch clamp to second zero.
pub fn epoch_seconds(timestamp: DateTime<Utc>) -> u64 {
    u64::try_from(timestamp.timestamp()).unwrap_or(0)
}

/// Encodes a timestamp as the sortable seconds prefix of a key.
///
/// Sub-second precision is discarded. Byte order of the result equals
/// numeric order of the truncated seconds.
pub fn encode(timestamp: DateTime<Utc>) -> Vec<u8> {
    format!("{:0width$}", epoch_seconds(timestamp), width = SECONDS_WIDTH).into_bytes()
}

/// Decodes the integer epoch seconds from an encoded key or seconds prefix.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the leading bytes are not a
/// zero-padded decimal seconds field.
pub fn decode(bytes: &[u8]) -> Result<u64> {
    let Some(seconds) = bytes.get(..SECONDS_WIDTH) else {
        return Err(invalid(bytes, format!("shorter than {SECONDS_WIDTH} bytes")));
    };
    parse_digits(bytes, seconds)
}

/// A fully qualified persistent store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// Whole epoch seconds of the event timestamp.
    pub secs: u64,
    /// Position of the event among writes in the same second.
    pub seq: u32,
}

impl EventKey {
    /// Creates a key from its parts.
    pub fn new(secs: u64, seq: u32) -> Self {
        Self { secs, seq }
    }

    /// The smallest key within the given second.
    pub fn first_in(secs: u64) -> Self {
        Self { secs, seq: 0 }
    }

    /// The largest key within the given second.
    pub fn last_in(secs: u64) -> Self {
        Self { secs, seq: u32::MAX }
    }

    /// Returns the key that follows `previous` for a write stamped at `secs`.
    ///
    /// Writes in the same second as `previous` get the next sequence number.
    /// A write in a later second starts over at sequence zero. A write stamped
    /// earlier than `previous` stays in the previous second so keys remain
    /// monotonic.
    pub fn next_after(previous: Option<Self>, secs: u64) -> Self {
        match previous {
            Some(prev) if secs <= prev.secs => match prev.seq.checked_add(1) {
                Some(seq) => Self { secs: prev.secs, seq },
                None => Self::first_in(prev.secs.saturating_add(1)),
            },
            _ => Self::first_in(secs),
        }
    }

    /// Encodes the key into its sortable byte form.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{:0sw$}.{:0qw$}",
            self.secs,
            self.seq,
            sw = SECONDS_WIDTH,
            qw = SEQUENCE_WIDTH
        )
        .into_bytes()
    }

    /// Decodes a key from its byte form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if the bytes do not match the key layout.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(invalid(
                bytes,
                format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
            ));
        }
        if bytes[SECONDS_WIDTH] != SEPARATOR {
            return Err(invalid(bytes, "missing '.' separator".to_string()));
        }

        let secs = decode(bytes)?;
        let seq = parse_digits(bytes, &bytes[SECONDS_WIDTH + 1..])?;
        let seq = u32::try_from(seq)
            .map_err(|_| invalid(bytes, "sequence out of range".to_string()))?;

        Ok(Self { secs, seq })
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.secs, self.seq)
    }
}

fn parse_digits(key: &[u8], digits: &[u8]) -> Result<u64> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid(key, "non-digit characters".to_string()));
    }
    // All bytes are ASCII digits, so the slice is valid UTF-8.
    let text = std::str::from_utf8(digits).map_err(|e| invalid(key, e.to_string()))?;
    text.parse::<u64>().map_err(|e| invalid(key, e.to_string()))
}

fn invalid(key: &[u8], reason: String) -> crate::error::VmtrailError {
    CodecError::InvalidKey {
        key: String::from_utf8_lossy(key).into_owned(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_truncates_to_seconds() {
        let ts = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        assert_eq!(encode(ts), b"00000000001700000000".to_vec());
        assert_eq!(decode(&encode(ts)).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_encoded_order_matches_numeric_order() {
        let small = encode(Utc.timestamp_opt(999, 0).unwrap());
        let large = encode(Utc.timestamp_opt(1_000, 0).unwrap());
        // Unpadded "999" would sort after "1000".
        assert!(small < large);

        let a = EventKey::new(999, 7).encode();
        let b = EventKey::new(1_000, 0).encode();
        let c = EventKey::new(1_000, 10).encode();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_pre_epoch_clamps_to_zero() {
        let ts = Utc.timestamp_opt(-50, 0).unwrap();
        assert_eq!(epoch_seconds(ts), 0);
    }

    #[test]
    fn test_key_layout() {
        let key = EventKey::new(1_700_000_000, 3);
        assert_eq!(key.encode(), b"00000000001700000000.0000000003".to_vec());
        assert_eq!(key.encode().len(), KEY_LEN);
        assert_eq!(EventKey::decode(&key.encode()).unwrap(), key);
        assert_eq!(decode(&key.encode()).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_first_and_last_bracket_second() {
        let inner = EventKey::new(42, 12345).encode();
        assert!(EventKey::first_in(42).encode() <= inner);
        assert!(inner <= EventKey::last_in(42).encode());
        assert!(EventKey::last_in(42).encode() < EventKey::first_in(43).encode());
    }

    #[test]
    fn test_next_after_sequences_same_second() {
        let first = EventKey::next_after(None, 100);
        assert_eq!(first, EventKey::new(100, 0));

        let second = EventKey::next_after(Some(first), 100);
        assert_eq!(second, EventKey::new(100, 1));

        let later = EventKey::next_after(Some(second), 101);
        assert_eq!(later, EventKey::new(101, 0));

        // Clock stepped backwards: stay monotonic.
        let stepped = EventKey::next_after(Some(later), 99);
        assert_eq!(stepped, EventKey::new(101, 1));
        assert!(stepped > later);
    }

    #[test]
    fn test_next_after_sequence_overflow_rolls_second() {
        let full = EventKey::last_in(5);
        assert_eq!(EventKey::next_after(Some(full), 5), EventKey::new(6, 0));
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(EventKey::decode(b"123").is_err());
        assert!(EventKey::decode(b"00000000001700000000-0000000003").is_err());
        assert!(EventKey::decode(b"0000000000170000000x.0000000003").is_err());
        assert!(EventKey::decode(b"00000000001700000000.9999999999").is_err());
        assert!(decode(b"short").is_err());
    }
}
