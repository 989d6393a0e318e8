//! Record format and framing.
//!
//! Every record on disk is framed as:
//!
//! ```text
//! +----------------+----------------+------------------------+
//! | len: u32 (LE)  | crc: u32 (LE)  | payload: len bytes     |
//! +----------------+----------------+------------------------+
//! ```
//!
//! `crc` is the CRC32C of the payload; the payload is a bincode-encoded
//! [`Record`].

use crate::error::{StoreError, StoreResult};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// Bytes preceding each payload.
pub(crate) const HEADER_LEN: usize = 8;

/// Upper bound on a single payload; anything larger is treated as a torn write.
pub(crate) const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// What a record does to its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum RecordKind {
    /// Stores `value` under the key.
    Put,
    /// Removes the key. `origin` is the segment the tombstone was first written to.
    Delete { origin: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Record {
    pub kind: RecordKind,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Absolute expiry in milliseconds since the Unix epoch.
    pub expires_at: Option<u64>,
}

impl Record {
    pub fn put(key: &[u8], value: &[u8], expires_at: Option<u64>) -> Self {
        Self {
            kind: RecordKind::Put,
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at,
        }
    }

    pub fn delete(key: &[u8], origin: u64) -> Self {
        Self {
            kind: RecordKind::Delete { origin },
            key: key.to_vec(),
            value: Vec::new(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_millis)
    }

    /// Encode into a complete frame.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let payload = bincode::serialize(self).map_err(|e| StoreError::Encode(e.to_string()))?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(StoreError::Encode(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32c(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameFault {
    /// The frame ends before its declared length.
    Truncated,
    /// Declared length is implausible.
    Oversized(usize),
    /// Checksum mismatch.
    Checksum { expected: u32, actual: u32 },
    /// Payload did not decode.
    Malformed(String),
}

impl std::fmt::Display for FrameFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated frame"),
            Self::Oversized(len) => write!(f, "frame length {} exceeds limit", len),
            Self::Checksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {:08x}, got {:08x}", expected, actual)
            }
            Self::Malformed(reason) => write!(f, "malformed payload: {}", reason),
        }
    }
}

/// Result of pulling the next frame from a reader.
pub(crate) enum NextFrame {
    /// A complete, verified frame and its decoded record.
    Record { frame: Vec<u8>, record: Record },
    /// Clean end of input.
    End,
    /// Unreadable data starting at the current position.
    Fault(FrameFault),
}

/// Decode a complete frame, verifying its checksum.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<Record, FrameFault> {
    if frame.len() < HEADER_LEN {
        return Err(FrameFault::Truncated);
    }
    let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let expected = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let payload = &frame[HEADER_LEN..];
    if payload.len() != len {
        return Err(FrameFault::Truncated);
    }
    let actual = crc32c(payload);
    if actual != expected {
        return Err(FrameFault::Checksum { expected, actual });
    }
    bincode::deserialize(payload).map_err(|e| FrameFault::Malformed(e.to_string()))
}

/// Read the next frame from a sequential reader.
pub(crate) fn read_frame<R: Read>(reader: &mut R) -> io::Result<NextFrame> {
    let mut header = [0u8; HEADER_LEN];
    match read_full(reader, &mut header)? {
        0 => return Ok(NextFrame::End),
        n if n < HEADER_LEN => return Ok(NextFrame::Fault(FrameFault::Truncated)),
        _ => {}
    }

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Ok(NextFrame::Fault(FrameFault::Oversized(len)));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + len, 0);
    if read_full(reader, &mut frame[HEADER_LEN..])? < len {
        return Ok(NextFrame::Fault(FrameFault::Truncated));
    }

    match decode_frame(&frame) {
        Ok(record) => Ok(NextFrame::Record { frame, record }),
        Err(fault) => Ok(NextFrame::Fault(fault)),
    }
}

/// Fill `buf` as far as the reader allows; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_decodes_back() {
        let record = Record::put(b"user:1", b"alice", Some(42));
        let frame = record.encode().unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), record);
    }

    #[test]
    fn test_checksum_detects_bit_flip() {
        let mut frame = Record::put(b"k", b"value", None).encode().unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(decode_frame(&frame), Err(FrameFault::Checksum { .. })));
    }

    #[test]
    fn test_read_frame_sequence_and_torn_tail() {
        let mut bytes = Record::put(b"a", b"1", None).encode().unwrap();
        bytes.extend(Record::delete(b"a", 3).encode().unwrap());
        let torn = Record::put(b"b", b"2", None).encode().unwrap();
        bytes.extend_from_slice(&torn[..torn.len() - 2]);

        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            NextFrame::Record { record, .. } if record.kind == RecordKind::Put
        ));
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            NextFrame::Record { record, .. } if record.kind == RecordKind::Delete { origin: 3 }
        ));
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            NextFrame::Fault(FrameFault::Truncated)
        ));
    }

    #[test]
    fn test_read_frame_empty_input_is_end() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(read_frame(&mut cursor).unwrap(), NextFrame::End));
    }

    #[test]
    fn test_expiry_check() {
        let record = Record::put(b"k", b"v", Some(1_000));
        assert!(!record.is_expired(999));
        assert!(record.is_expired(1_000));
        assert!(!Record::put(b"k", b"v", None).is_expired(u64::MAX));
    }
}
