//! Packet sources feeding the worker pipeline.

use std::{io, path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;

pub mod erf;

/// Capture timestamp normalised to seconds and microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Timestamp {
    pub sec: u64,
    pub usec: u32,
}

impl Timestamp {
    pub fn new(sec: u64, usec: u32) -> Self {
        Self { sec, usec }
    }

    pub fn from_micros(micros: u64) -> Self {
        Self {
            sec: micros / 1_000_000,
            usec: (micros % 1_000_000) as u32,
        }
    }

    pub fn as_micros(&self) -> u64 {
        self.sec * 1_000_000 + u64::from(self.usec)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.as_micros().saturating_sub(earlier.as_micros()))
    }
}

/// Link-layer type of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLink {
    Ethernet,
}

/// A captured frame as produced by a [`PacketSource`].
#[derive(Debug, Clone)]
pub struct Packet {
    pub ts: Timestamp,
    pub datalink: DataLink,
    pub data: Vec<u8>,
}

/// Totals a source has produced so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub packets: u64,
    pub bytes: u64,
}

/// Pull interface over a capture.
///
/// `Ok(None)` marks the clean end of input. Any error is final: the caller
/// stops pulling and shuts the pipeline down.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError>;

    fn stats(&self) -> SourceStats;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open capture file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read capture: {0}")]
    Io(#[from] io::Error),

    #[error("capture truncated inside the record at byte offset {offset}")]
    Truncated { offset: u64 },

    #[error("record at byte offset {offset} has invalid length {rlen}")]
    BadRecordLength { offset: u64, rlen: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_micros_roundtrip() {
        let ts = Timestamp::new(1_700_000_000, 250_000);
        assert_eq!(Timestamp::from_micros(ts.as_micros()), ts);
    }

    #[test]
    fn test_timestamp_saturating_since() {
        let earlier = Timestamp::new(10, 900_000);
        let later = Timestamp::new(12, 100_000);

        assert_eq!(later.saturating_since(earlier), Duration::from_millis(1200));
        assert_eq!(earlier.saturating_since(later), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1, 999_999) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 1) > Timestamp::new(2, 0));
    }
}
