//! Wire-format definitions for GBN datagrams.
//!
//! Two kinds of datagram travel between peers, both as plain ASCII text:
//!
//! ```text
//!  data packet   "<seq>:<payload>"    e.g.  b"7:hello"
//!  ACK           "<ack>"              e.g.  b"7"
//! ```
//!
//! `seq` / `ack` are unsigned decimal integers.  The payload is every byte
//! after the **first** `:`, so payloads may contain whitespace or further
//! delimiters.  A datagram with no `:` must be all digits to be an ACK;
//! anything else is malformed.
//!
//! No I/O happens here.

use thiserror::Error;

/// Separator between the sequence number and the payload of a data packet.
pub const DELIMITER: u8 = b':';

/// Worst-case framing overhead of a data packet: `u64::MAX` in decimal
/// (20 digits) plus the delimiter.
pub const MAX_OVERHEAD: usize = 21;

/// A numbered slice of the application byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Position of this packet in its direction's sequence space.
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Acknowledgement of the in-order packet `ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub ack: u64,
}

/// Anything that can arrive on the socket once it has been demultiplexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Data(Packet),
    Ack(Ack),
}

/// Errors that can arise when parsing or framing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    /// Neither `<digits>` nor `<digits>:<payload>`.
    #[error("malformed datagram: {0:?}")]
    Malformed(String),
    /// Digits that do not fit a 64-bit sequence number.
    #[error("sequence number out of range: {0}")]
    BadSequence(String),
    #[error("datagram of {len} bytes exceeds buffer capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },
}

impl Packet {
    pub fn new(seq: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// Serialise as `"<seq>:<payload>"`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_OVERHEAD + self.payload.len());
        buf.extend_from_slice(self.seq.to_string().as_bytes());
        buf.push(DELIMITER);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

impl Ack {
    pub fn new(ack: u64) -> Self {
        Self { ack }
    }

    /// Serialise as the bare decimal ACK number.
    pub fn encode(&self) -> Vec<u8> {
        self.ack.to_string().into_bytes()
    }
}

impl Datagram {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::Data(p) => p.encode(),
            Datagram::Ack(a) => a.encode(),
        }
    }

    /// Demultiplex and parse a raw datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.is_empty() {
            return Err(PacketError::Empty);
        }

        match buf.iter().position(|&b| b == DELIMITER) {
            Some(split) => {
                let seq = parse_number(&buf[..split])
                    .ok_or_else(|| PacketError::Malformed(lossy_preview(buf)))??;
                Ok(Datagram::Data(Packet {
                    seq,
                    payload: buf[split + 1..].to_vec(),
                }))
            }
            None => {
                let ack = parse_number(buf)
                    .ok_or_else(|| PacketError::Malformed(lossy_preview(buf)))??;
                Ok(Datagram::Ack(Ack { ack }))
            }
        }
    }
}

/// Parse a non-empty run of ASCII digits.
///
/// Returns `None` when `digits` is not a digit run at all, and
/// `Some(Err(BadSequence))` when it is one but overflows `u64`.
fn parse_number(digits: &[u8]) -> Option<Result<u64, PacketError>> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // All-ASCII, so the conversion cannot fail.
    let text = std::str::from_utf8(digits).ok()?;
    Some(
        text.parse::<u64>()
            .map_err(|_| PacketError::BadSequence(text.to_string())),
    )
}

/// Short printable rendering of a datagram for error messages.
fn lossy_preview(buf: &[u8]) -> String {
    const PREVIEW: usize = 32;
    let end = buf.len().min(PREVIEW);
    let mut s = String::from_utf8_lossy(&buf[..end]).into_owned();
    if buf.len() > PREVIEW {
        s.push('…');
    }
    s
}
