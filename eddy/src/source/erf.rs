//! Reader for Endace ERF capture files.
//!
//! Every record starts with a 16-byte header:
//!
//! ```text
//!  0      8     9      10     12     14     16
//!  | ts   | type| flags| rlen | lctr | wlen |
//! ```
//!
//! `ts` is a little-endian 32.32 fixed-point count of seconds, the length
//! fields are big-endian. `rlen` covers the whole record including the
//! header. Ethernet records carry two bytes of padding before the frame and
//! `wlen` includes the 4-byte frame check sequence.

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::Path,
};

use tracing::{debug, info, warn};

use crate::source::{DataLink, Packet, PacketSource, SourceError, SourceStats, Timestamp};

pub const ERF_TYPE_ETH: u8 = 2;

const RECORD_HEADER_LEN: usize = 16;
const ETH_PAD_LEN: usize = 2;
const FCS_LEN: usize = 4;

/// Per-record flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErfFlags(pub u8);

impl ErfFlags {
    pub fn rx_error(&self) -> bool {
        self.0 & 0b0001_0000 != 0
    }
    pub fn ds_error(&self) -> bool {
        self.0 & 0b0010_0000 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErfRecordHeader {
    pub ts: u64,
    pub record_type: u8,
    pub flags: ErfFlags,
    pub rlen: u16,
    pub lctr: u16,
    pub wlen: u16,
}

impl ErfRecordHeader {
    pub fn parse(buf: &[u8; RECORD_HEADER_LEN]) -> Self {
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&buf[0..8]);
        Self {
            ts: u64::from_le_bytes(ts),
            record_type: buf[8],
            flags: ErfFlags(buf[9]),
            rlen: u16::from_be_bytes([buf[10], buf[11]]),
            lctr: u16::from_be_bytes([buf[12], buf[13]]),
            wlen: u16::from_be_bytes([buf[14], buf[15]]),
        }
    }
}

/// Converts an ERF 32.32 fixed-point timestamp to seconds + microseconds,
/// rounding the fraction to the nearest microsecond.
pub fn erf_timestamp(ts: u64) -> Timestamp {
    let mut sec = ts >> 32;
    let frac = (ts & 0xffff_ffff) * 1_000_000 + 0x8000_0000;
    let mut usec = frac >> 32;
    if usec >= 1_000_000 {
        usec -= 1_000_000;
        sec += 1;
    }
    Timestamp::new(sec, usec as u32)
}

/// Sequential ERF reader. Only Ethernet records are produced; records of any
/// other type are consumed and skipped.
pub struct ErfFileSource<R = BufReader<File>> {
    reader: R,
    label: String,
    offset: u64,
    stats: SourceStats,
    skipped: u64,
}

impl ErfFileSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            event.name = "source.erf.opened",
            file.path = %path.display(),
            "processing erf file"
        );
        Ok(Self::from_reader(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }
}

impl<R: Read> ErfFileSource<R> {
    pub fn from_reader(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
            offset: 0,
            stats: SourceStats::default(),
            skipped: 0,
        }
    }

    /// Records consumed but not produced because of an unsupported type.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Fills `buf` completely, returning how many bytes were read before EOF.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Io(e)),
            }
        }
        Ok(filled)
    }

    fn read_record(&mut self) -> Result<Option<(ErfRecordHeader, Vec<u8>)>, SourceError> {
        let record_offset = self.offset;
        let mut raw = [0u8; RECORD_HEADER_LEN];
        match self.read_full(&mut raw)? {
            0 => return Ok(None),
            RECORD_HEADER_LEN => {}
            _ => {
                return Err(SourceError::Truncated {
                    offset: record_offset,
                });
            }
        }
        let header = ErfRecordHeader::parse(&raw);

        let rlen = usize::from(header.rlen);
        if rlen < RECORD_HEADER_LEN {
            return Err(SourceError::BadRecordLength {
                offset: record_offset,
                rlen: header.rlen,
            });
        }

        let mut body = vec![0u8; rlen - RECORD_HEADER_LEN];
        if self.read_full(&mut body)? != body.len() {
            return Err(SourceError::Truncated {
                offset: record_offset,
            });
        }
        self.offset += rlen as u64;
        Ok(Some((header, body)))
    }
}

impl<R: Read + Send> PacketSource for ErfFileSource<R> {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            let Some((header, body)) = self.read_record()? else {
                info!(
                    event.name = "source.erf.end_of_file",
                    file.path = %self.label,
                    packets = self.stats.packets,
                    bytes = self.stats.bytes,
                    skipped = self.skipped,
                    "end of erf file reached"
                );
                return Ok(None);
            };

            if header.record_type != ERF_TYPE_ETH {
                self.skipped += 1;
                warn!(
                    event.name = "source.erf.unsupported_record",
                    file.path = %self.label,
                    erf.record_type = header.record_type,
                    "erf record type not implemented, skipping record"
                );
                continue;
            }
            if body.len() < ETH_PAD_LEN {
                return Err(SourceError::BadRecordLength {
                    offset: self.offset - u64::from(header.rlen),
                    rlen: header.rlen,
                });
            }

            let mut data = body;
            data.drain(..ETH_PAD_LEN);
            let wire_len = usize::from(header.wlen).saturating_sub(FCS_LEN);
            data.truncate(wire_len);

            if header.flags.rx_error() || header.flags.ds_error() {
                debug!(
                    event.name = "source.erf.record_error_flag",
                    erf.flags = header.flags.0,
                    "erf record carries an error flag"
                );
            }

            self.stats.packets += 1;
            self.stats.bytes += u64::from(header.wlen);

            return Ok(Some(Packet {
                ts: erf_timestamp(header.ts),
                datalink: DataLink::Ethernet,
                data,
            }));
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use tempfile::NamedTempFile;

    use super::*;

    impl ErfRecordHeader {
        fn to_bytes(&self) -> [u8; RECORD_HEADER_LEN] {
            let mut buf = [0u8; RECORD_HEADER_LEN];
            buf[0..8].copy_from_slice(&self.ts.to_le_bytes());
            buf[8] = self.record_type;
            buf[9] = self.flags.0;
            buf[10..12].copy_from_slice(&self.rlen.to_be_bytes());
            buf[12..14].copy_from_slice(&self.lctr.to_be_bytes());
            buf[14..16].copy_from_slice(&self.wlen.to_be_bytes());
            buf
        }
    }

    /// Builds one ERF record around `frame`; `wlen` includes a 4-byte FCS.
    pub(crate) fn erf_record(ts: Timestamp, record_type: u8, frame: &[u8]) -> Vec<u8> {
        let pad = if record_type == ERF_TYPE_ETH { ETH_PAD_LEN } else { 0 };
        let rlen = RECORD_HEADER_LEN + pad + frame.len();
        let header = ErfRecordHeader {
            ts: (ts.sec << 32) | ((u64::from(ts.usec) << 32) / 1_000_000 + 1),
            record_type,
            flags: ErfFlags::default(),
            rlen: rlen as u16,
            lctr: 0,
            wlen: (frame.len() + FCS_LEN) as u16,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend(std::iter::repeat_n(0u8, pad));
        out.extend_from_slice(frame);
        out
    }

    #[test]
    fn test_timestamp_conversion_rounds_to_microseconds() {
        assert_eq!(erf_timestamp(5 << 32), Timestamp::new(5, 0));
        assert_eq!(erf_timestamp((5 << 32) | 0x8000_0000), Timestamp::new(5, 500_000));
        // Largest fraction rounds up into the next second.
        assert_eq!(erf_timestamp((5 << 32) | 0xffff_ffff), Timestamp::new(6, 0));
    }

    #[test]
    fn test_header_parse_matches_layout() {
        let raw: [u8; 16] = [
            0x00, 0x00, 0x00, 0x80, 0x10, 0x00, 0x00, 0x00, // ts (LE)
            0x02, // type
            0x11, // flags: iface 1, rx error
            0x00, 0x5a, // rlen
            0x00, 0x03, // lctr
            0x00, 0x44, // wlen
        ];
        let header = ErfRecordHeader::parse(&raw);

        assert_eq!(header.ts, 0x0000_0010_8000_0000);
        assert_eq!(header.record_type, ERF_TYPE_ETH);
        assert!(header.flags.rx_error());
        assert!(!header.flags.ds_error());
        assert_eq!(header.rlen, 90);
        assert_eq!(header.lctr, 3);
        assert_eq!(header.wlen, 68);
        assert_eq!(header.to_bytes(), raw);
    }

    #[test]
    fn test_reads_ethernet_records_and_trims_fcs() {
        let frame: Vec<u8> = (0u8..60).collect();
        let mut bytes = erf_record(Timestamp::new(100, 250_000), ERF_TYPE_ETH, &frame);
        bytes.extend(erf_record(Timestamp::new(101, 0), ERF_TYPE_ETH, &frame[..42]));

        let mut source = ErfFileSource::from_reader(Cursor::new(bytes), "memory");

        let first = source.next_packet().unwrap().unwrap();
        assert_eq!(first.ts, Timestamp::new(100, 250_000));
        assert_eq!(first.datalink, DataLink::Ethernet);
        assert_eq!(first.data, frame);

        let second = source.next_packet().unwrap().unwrap();
        assert_eq!(second.ts, Timestamp::new(101, 0));
        assert_eq!(second.data.len(), 42);

        assert!(source.next_packet().unwrap().is_none());
        assert_eq!(
            source.stats(),
            SourceStats {
                packets: 2,
                bytes: (60 + 4) + (42 + 4),
            }
        );
    }

    #[test]
    fn test_skips_unsupported_record_types() {
        let frame = [0xaau8; 20];
        let mut bytes = erf_record(Timestamp::new(1, 0), 1, &frame);
        bytes.extend(erf_record(Timestamp::new(2, 0), ERF_TYPE_ETH, &frame));

        let mut source = ErfFileSource::from_reader(Cursor::new(bytes), "memory");

        let packet = source.next_packet().unwrap().unwrap();
        assert_eq!(packet.ts.sec, 2);
        assert_eq!(source.skipped(), 1);
        assert!(source.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let bytes = erf_record(Timestamp::new(1, 0), ERF_TYPE_ETH, &[0u8; 30]);
        let mut source = ErfFileSource::from_reader(Cursor::new(bytes[..10].to_vec()), "memory");

        assert!(matches!(
            source.next_packet(),
            Err(SourceError::Truncated { offset: 0 })
        ));
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut bytes = erf_record(Timestamp::new(1, 0), ERF_TYPE_ETH, &[0u8; 30]);
        let first_len = bytes.len() as u64;
        bytes.extend(erf_record(Timestamp::new(2, 0), ERF_TYPE_ETH, &[0u8; 30]));
        bytes.truncate(bytes.len() - 5);

        let mut source = ErfFileSource::from_reader(Cursor::new(bytes), "memory");

        assert!(source.next_packet().unwrap().is_some());
        assert!(matches!(
            source.next_packet(),
            Err(SourceError::Truncated { offset }) if offset == first_len
        ));
    }

    #[test]
    fn test_record_length_shorter_than_header_is_an_error() {
        let mut header = ErfRecordHeader::parse(&[0u8; 16]);
        header.record_type = ERF_TYPE_ETH;
        header.rlen = 8;
        let mut source =
            ErfFileSource::from_reader(Cursor::new(header.to_bytes().to_vec()), "memory");

        assert!(matches!(
            source.next_packet(),
            Err(SourceError::BadRecordLength { rlen: 8, .. })
        ));
    }

    #[test]
    fn test_open_reads_from_disk() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(&erf_record(Timestamp::new(7, 0), ERF_TYPE_ETH, &[1u8; 14]))
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");

        let mut source = ErfFileSource::open(file.path()).expect("open erf file");

        assert_eq!(source.next_packet().unwrap().unwrap().data, vec![1u8; 14]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let err = ErfFileSource::open(Path::new("/nonexistent/capture.erf"))
            .err()
            .expect("open should fail");
        assert!(matches!(err, SourceError::Open { .. }));
    }
}
