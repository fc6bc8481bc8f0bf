//! Go-Back-N receive-side state machine.
//!
//! [`ReceiverSequencer`] implements the receiver side of Go-Back-N:
//!
//! - Only the packet with `seq == expected` is accepted; it is acknowledged
//!   with ACK `seq` and `expected` advances by one.
//! - Everything else (duplicates, packets beyond a gap) is **silently
//!   discarded**: no ACK, no NAK, no buffering.  The sender's timeout is what
//!   fills the gap.
//!
//! There is no terminal state; `expected` is never reset, so consecutive
//! streams from the same peer simply continue the sequence space.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::gbn_sender::SenderWindow`]).

use std::collections::VecDeque;

use crate::packet::{Ack, Packet};

/// Decision taken for one inbound data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// In order: deliver and send this ACK.
    Accepted(Ack),
    /// Already accepted earlier (`seq < expected`).
    Duplicate { expected: u64 },
    /// Beyond a gap (`seq > expected`).
    OutOfOrder { expected: u64 },
}

/// Go-Back-N receive-side state for one inbound direction.
#[derive(Debug, Default)]
pub struct ReceiverSequencer {
    /// Next sequence number that will be accepted.
    expected: u64,
    /// In-order payload bytes buffered for the application.
    pub app_buffer: VecDeque<u8>,
    /// Packets discarded so far (duplicates and gaps).
    discarded: u64,
}

impl ReceiverSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an inbound data packet.
    pub fn on_packet(&mut self, packet: &Packet) -> Verdict {
        let expected = self.expected;
        if packet.seq == expected {
            self.app_buffer.extend(packet.payload.iter().copied());
            self.expected += 1;
            Verdict::Accepted(Ack::new(packet.seq))
        } else if packet.seq < expected {
            self.discarded += 1;
            Verdict::Duplicate { expected }
        } else {
            self.discarded += 1;
            Verdict::OutOfOrder { expected }
        }
    }

    /// Sequence number of the next packet that will be accepted.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Copy up to `buf.len()` in-order bytes from the application buffer into
    /// `buf`.  Returns the number of bytes actually copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.app_buffer.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Drain the whole application buffer.
    pub fn take(&mut self) -> Vec<u8> {
        self.app_buffer.drain(..).collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
