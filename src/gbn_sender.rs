//! Go-Back-N send-side state machine.
//!
//! [`SenderWindow`] drives one finite byte stream through a sliding window of
//! at most `W` outstanding packets.  The stream is cut into fixed-size
//! segments, one per sequence number.
//!
//! # Protocol contract
//!
//! - `base ≤ next_seq ≤ base + W` at all times.
//! - ACK `n` is recorded in the acknowledgement record slot `n mod W`; the
//!   window slides over every contiguous acknowledged slot starting at `base`.
//! - ACKs outside `[base, next_seq)` are ignored (late duplicates or bogus).
//! - A single [`RetransmitTimer`] covers the whole outstanding range.  On
//!   expiry **every** packet in `[base, next_seq)` is handed back for
//!   retransmission (go back N) and the timer restarts.
//! - Sequence numbers are `u64` and never wrap; only the record index wraps.
//!
//! This module only manages state; all socket I/O and loss simulation is the
//! caller's responsibility.

use std::time::Duration;

use tokio::time::Instant;

use crate::packet::Packet;
use crate::simulator::{Transmission, TransmissionKind};
use crate::timer::RetransmitTimer;

// ---------------------------------------------------------------------------
// SendReport
// ---------------------------------------------------------------------------

/// Counters for one submitted stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Number of packets the stream was cut into.
    pub packets: u64,
    /// Transmissions actually handed to the socket.
    pub transmissions: u64,
    /// Go-back-N resends offered to the channel (delivered or dropped).
    pub retransmissions: u64,
    /// Transmissions vetoed by the loss policy.
    pub dropped: u64,
    /// Timer expiries.
    pub timeouts: u64,
}

// ---------------------------------------------------------------------------
// AckOutcome
// ---------------------------------------------------------------------------

/// What an inbound ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Outside `[base, next_seq)`; no state changed.
    Ignored,
    /// Recorded; `slid` is how far `base` advanced (0 when a gap remains).
    Accepted { slid: u64 },
}

// ---------------------------------------------------------------------------
// SenderWindow
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one byte stream.
///
/// # Sequence-number layout
///
/// ```text
///  first_seq     base           next_seq        base+W          end
///      │           │                │              │              │
///  ────┼───────────┼────────────────┼──────────────┼──────────────┼──▶
///      │  acked    │ <─ in flight ─▶│ <─ usable ──▶│  not yet     │
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    /// Oldest unacknowledged sequence number (left window edge).
    pub base: u64,
    /// Next sequence number eligible for first transmission.
    pub next_seq: u64,
    /// Sequence number of the stream's first packet.
    first_seq: u64,
    /// Window size W.
    window_size: usize,
    /// Per-slot ACK flags, indexed by `seq mod W`.
    acked: Vec<bool>,
    /// Payload of every packet, indexed by `seq - first_seq`.
    segments: Vec<Vec<u8>>,
    timer: RetransmitTimer,
    /// Consecutive timeouts since the window last slid.
    retries: u32,
    report: SendReport,
}

impl SenderWindow {
    /// Cut `data` into `segment_size`-byte packets numbered from `first_seq`.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` or `segment_size` is zero; both are rejected
    /// earlier by [`crate::config::GbnConfig::validate`].
    pub fn new(
        first_seq: u64,
        data: &[u8],
        segment_size: usize,
        window_size: usize,
        timeout: Duration,
    ) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        assert!(segment_size >= 1, "segment_size must be at least 1");
        let segments: Vec<Vec<u8>> = data.chunks(segment_size).map(<[u8]>::to_vec).collect();
        Self {
            base: first_seq,
            next_seq: first_seq,
            first_seq,
            window_size,
            acked: vec![false; window_size],
            report: SendReport {
                packets: segments.len() as u64,
                ..SendReport::default()
            },
            segments,
            timer: RetransmitTimer::new(timeout),
            retries: 0,
        }
    }

    /// One past the last sequence number of the stream.
    pub fn end(&self) -> u64 {
        self.first_seq + self.segments.len() as u64
    }

    /// `true` once every packet of the stream has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.end()
    }

    /// Number of packets sent but not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.next_seq - self.base
    }

    /// `true` when another fresh packet may enter the window.
    pub fn can_send(&self) -> bool {
        self.next_seq < self.base + self.window_size as u64 && self.next_seq < self.end()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Acknowledgement record, slot `i` covering sequence numbers `≡ i mod W`.
    pub fn ack_record(&self) -> &[bool] {
        &self.acked
    }

    /// Build the data packet for `seq`.
    ///
    /// Returns `None` for sequence numbers outside this stream.
    pub fn packet(&self, seq: u64) -> Option<Packet> {
        let idx = seq.checked_sub(self.first_seq)?;
        let payload = self.segments.get(usize::try_from(idx).ok()?)?;
        Some(Packet::new(seq, payload.clone()))
    }

    /// Move every packet the window has room for into flight.
    ///
    /// Returns the packets in sequence order; the caller transmits them (or
    /// lets the loss policy drop them).  The timer starts when the first
    /// packet of an empty window goes out.
    pub fn fill(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.can_send() {
            if self.base == self.next_seq {
                self.timer.start();
            }
            if let Some(pkt) = self.packet(self.next_seq) {
                out.push(pkt);
            }
            self.next_seq += 1;
        }
        out
    }

    /// Process an inbound ACK.
    ///
    /// Marks the record slot, slides `base` over the contiguous acknowledged
    /// prefix, then stops the timer if the window emptied or restarts it to
    /// cover the new oldest packet.
    pub fn on_ack(&mut self, ack: u64) -> AckOutcome {
        if ack < self.base || ack >= self.next_seq {
            return AckOutcome::Ignored;
        }
        let slot = self.slot(ack);
        self.acked[slot] = true;

        let mut slid = 0u64;
        while self.base < self.next_seq {
            let slot = self.slot(self.base);
            if !self.acked[slot] {
                break;
            }
            self.acked[slot] = false;
            self.base += 1;
            slid += 1;
        }

        if slid > 0 {
            self.retries = 0;
        }
        if self.base == self.next_seq {
            self.timer.stop();
        } else {
            self.timer.start();
        }
        AckOutcome::Accepted { slid }
    }

    /// If the timer has expired, return the whole outstanding range for
    /// retransmission and restart the timer.
    pub fn on_timeout(&mut self) -> Option<Vec<Packet>> {
        if !self.timer.is_expired() {
            return None;
        }
        self.retries += 1;
        self.report.timeouts += 1;
        self.timer.start();
        Some((self.base..self.next_seq).filter_map(|s| self.packet(s)).collect())
    }

    /// Record the fate of one transmission for the [`SendReport`].
    pub fn note_transmission(&mut self, tx: &Transmission, dropped: bool) {
        if tx.kind == TransmissionKind::Retransmit {
            self.report.retransmissions += 1;
        }
        if dropped {
            self.report.dropped += 1;
        } else {
            self.report.transmissions += 1;
        }
    }

    /// Consecutive timeouts since the window last made progress.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// When the retransmission timer fires, `None` when idle.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn report(&self) -> SendReport {
        self.report
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.window_size as u64) as usize
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
