//! Framed wire codec for serial timing hardware.
//!
//! This module is intentionally I/O-free: pure encode/decode over byte
//! slices, testable without hardware. The transport quirks (baud, settle
//! delay, timeouts) live in [`super::serial`].
//!
//! Frame layout:
//! `[0x5A, type, len, payload.., checksum, 0x5B]` where checksum is the XOR
//! of type, len and payload bytes. Garbage between frames is skipped.

use std::fmt;

pub const FRAME_START: u8 = 0x5A;
pub const FRAME_END: u8 = 0x5B;

const TYPE_PASSING: u8 = 0x01;
const TYPE_STATUS: u8 = 0x02;
const TYPE_SET_FREQUENCIES: u8 = 0x03;
const TYPE_START: u8 = 0x04;
const TYPE_STOP: u8 = 0x05;

/// Frame overhead: start, type, len, checksum, end.
const OVERHEAD: usize = 5;

/// A decoded record from the hardware, or a command to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A transponder crossing.
    Passing {
        frequency_mhz: u16,
        peak: u16,
        /// Microseconds since the Unix epoch, already adjusted to the
        /// common wall clock by the hardware.
        timestamp_micros: u64,
    },
    /// Periodic gate health.
    Status { millivolts: u16, temperature_c: u8 },
    /// Configure listening frequencies.
    SetFrequencies { frequencies_mhz: Vec<u16> },
    StartDetection,
    StopDetection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    BadChecksum { expected: u8, found: u8 },
    UnknownType(u8),
    Truncated,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadChecksum { expected, found } => {
                write!(f, "bad checksum: expected {expected:#04x}, found {found:#04x}")
            }
            ProtocolError::UnknownType(t) => write!(f, "unknown record type {t:#04x}"),
            ProtocolError::Truncated => write!(f, "truncated frame"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode one record as a complete frame.
pub fn encode(record: &Record) -> Vec<u8> {
    let (record_type, payload): (u8, Vec<u8>) = match record {
        Record::Passing { frequency_mhz, peak, timestamp_micros } => {
            let mut p = Vec::with_capacity(12);
            p.extend_from_slice(&frequency_mhz.to_le_bytes());
            p.extend_from_slice(&peak.to_le_bytes());
            p.extend_from_slice(&timestamp_micros.to_le_bytes());
            (TYPE_PASSING, p)
        }
        Record::Status { millivolts, temperature_c } => {
            let mut p = Vec::with_capacity(3);
            p.extend_from_slice(&millivolts.to_le_bytes());
            p.push(*temperature_c);
            (TYPE_STATUS, p)
        }
        Record::SetFrequencies { frequencies_mhz } => {
            let mut p = Vec::with_capacity(1 + frequencies_mhz.len() * 2);
            p.push(frequencies_mhz.len() as u8);
            for f in frequencies_mhz {
                p.extend_from_slice(&f.to_le_bytes());
            }
            (TYPE_SET_FREQUENCIES, p)
        }
        Record::StartDetection => (TYPE_START, Vec::new()),
        Record::StopDetection => (TYPE_STOP, Vec::new()),
    };

    let mut frame = Vec::with_capacity(payload.len() + OVERHEAD);
    frame.push(FRAME_START);
    frame.push(record_type);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&payload);
    frame.push(checksum(&frame[1..]));
    frame.push(FRAME_END);
    frame
}

fn decode_body(record_type: u8, payload: &[u8]) -> Result<Record, ProtocolError> {
    match record_type {
        TYPE_PASSING => {
            if payload.len() != 12 {
                return Err(ProtocolError::Truncated);
            }
            Ok(Record::Passing {
                frequency_mhz: u16::from_le_bytes([payload[0], payload[1]]),
                peak: u16::from_le_bytes([payload[2], payload[3]]),
                timestamp_micros: u64::from_le_bytes(
                    payload[4..12].try_into().expect("length checked"),
                ),
            })
        }
        TYPE_STATUS => {
            if payload.len() != 3 {
                return Err(ProtocolError::Truncated);
            }
            Ok(Record::Status {
                millivolts: u16::from_le_bytes([payload[0], payload[1]]),
                temperature_c: payload[2],
            })
        }
        TYPE_SET_FREQUENCIES => {
            let count = *payload.first().ok_or(ProtocolError::Truncated)? as usize;
            if payload.len() != 1 + count * 2 {
                return Err(ProtocolError::Truncated);
            }
            let frequencies_mhz = payload[1..]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            Ok(Record::SetFrequencies { frequencies_mhz })
        }
        TYPE_START => Ok(Record::StartDetection),
        TYPE_STOP => Ok(Record::StopDetection),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

/// Incremental decoder over a byte stream.
///
/// Feed it whatever the port hands back; it buffers partial frames and skips
/// corrupt ones, so a noisy line degrades to dropped records rather than a
/// stuck stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and drain every complete record.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Record> {
        self.buf.extend_from_slice(bytes);

        let mut records = Vec::new();
        loop {
            // Resynchronize on the next frame start.
            match self.buf.iter().position(|&b| b == FRAME_START) {
                Some(0) => {}
                Some(n) => {
                    self.buf.drain(..n);
                }
                None => {
                    self.buf.clear();
                    return records;
                }
            }

            if self.buf.len() < OVERHEAD {
                return records;
            }

            let len = self.buf[2] as usize;
            let frame_len = len + OVERHEAD;
            if self.buf.len() < frame_len {
                return records;
            }

            let frame: Vec<u8> = self.buf.drain(..frame_len).collect();
            if frame[frame_len - 1] != FRAME_END {
                // Not a real frame boundary; drop the spurious start byte and
                // rescan the remainder.
                self.buf.splice(0..0, frame[1..].iter().copied());
                continue;
            }

            let record_type = frame[1];
            let payload = &frame[3..3 + len];
            let expected = checksum(&frame[1..3 + len]);
            let found = frame[3 + len];
            if expected != found {
                tracing::debug!(expected, found, "dropping frame with bad checksum");
                continue;
            }

            match decode_body(record_type, payload) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(error = %e, "dropping undecodable frame"),
            }
        }
    }
}
