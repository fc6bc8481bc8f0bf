//! Deterministic Go-Back-N scenarios.
//!
//! A [`Link`] wires one `SenderWindow` to one `ReceiverSequencer` through an
//! in-memory channel with a scripted loss policy.  Time runs on tokio's paused
//! clock, so every timeout fires exactly when the test advances past it and
//! the exact set of transmissions can be asserted.

use std::collections::VecDeque;
use std::time::Duration;

use gbn_over_udp::gbn_receiver::{ReceiverSequencer, Verdict};
use gbn_over_udp::gbn_sender::{AckOutcome, SenderWindow};
use gbn_over_udp::packet::Packet;
use gbn_over_udp::simulator::{
    DropOnce, LossPolicy, NeverDrop, RandomLoss, Transmission, TransmissionKind,
};

const RTO: Duration = Duration::from_millis(2000);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Link {
    sender: SenderWindow,
    receiver: ReceiverSequencer,
    loss: Box<dyn LossPolicy>,
    /// ACKs in flight back to the sender (never lost).
    acks: VecDeque<u64>,
    accepted: Vec<u64>,
    discarded: Vec<u64>,
    /// One entry per timeout: the range that was resent.
    resends: Vec<Vec<u64>>,
    ack_log: Vec<u64>,
}

impl Link {
    /// `packets` one-byte packets through a window of `w`.
    fn new(packets: usize, w: usize, loss: impl LossPolicy + 'static) -> Self {
        let data: Vec<u8> = (0..packets).map(|i| b'A' + (i % 26) as u8).collect();
        Self {
            sender: SenderWindow::new(0, &data, 1, w, RTO),
            receiver: ReceiverSequencer::new(),
            loss: Box::new(loss),
            acks: VecDeque::new(),
            accepted: Vec::new(),
            discarded: Vec::new(),
            resends: Vec::new(),
            ack_log: Vec::new(),
        }
    }

    fn deliver(&mut self, pkts: Vec<Packet>, kind: TransmissionKind) {
        for pkt in pkts {
            let tx = Transmission { kind, seq: pkt.seq };
            let dropped = self.loss.should_drop(&tx);
            self.sender.note_transmission(&tx, dropped);
            if dropped {
                continue;
            }
            match self.receiver.on_packet(&pkt) {
                Verdict::Accepted(ack) => {
                    self.accepted.push(pkt.seq);
                    self.ack_log.push(ack.ack);
                    self.acks.push_back(ack.ack);
                }
                Verdict::Duplicate { .. } | Verdict::OutOfOrder { .. } => {
                    self.discarded.push(pkt.seq)
                }
            }
        }
    }

    /// Fill and exchange ACKs until nothing more moves without a timeout.
    fn settle(&mut self) {
        loop {
            let fresh = self.sender.fill();
            self.deliver(fresh, TransmissionKind::Fresh);
            assert!(self.sender.outstanding() <= self.sender.window_size() as u64);
            assert!(self.sender.base <= self.sender.next_seq);

            match self.acks.pop_front() {
                Some(ack) => {
                    self.sender.on_ack(ack);
                }
                None => break,
            }
        }
    }

    async fn run_to_completion(&mut self) {
        self.settle();
        let mut rounds = 0;
        while !self.sender.is_complete() {
            rounds += 1;
            assert!(rounds < 1000, "stream did not complete");

            tokio::time::advance(RTO).await;
            let outstanding: Vec<u64> = (self.sender.base..self.sender.next_seq).collect();
            let resend = self.sender.on_timeout().expect("timer must be running");
            let seqs: Vec<u64> = resend.iter().map(|p| p.seq).collect();
            assert_eq!(seqs, outstanding, "timeout must resend exactly [base, next_seq)");
            self.resends.push(seqs);
            self.deliver(resend, TransmissionKind::Retransmit);
            self.settle();
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario A: lossless channel
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn lossless_ten_packets_window_four() {
    let mut link = Link::new(10, 4, NeverDrop);
    link.run_to_completion().await;

    assert_eq!(link.accepted, (0..10).collect::<Vec<_>>());
    assert!(link.discarded.is_empty());
    assert!(link.resends.is_empty(), "no retransmissions on a lossless link");
    assert_eq!(link.sender.base, 10);
    assert_eq!(link.sender.report().retransmissions, 0);
    assert_eq!(link.receiver.take(), b"ABCDEFGHIJ");
}

// ---------------------------------------------------------------------------
// Scenario B: packet #2 dropped once
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_drop_goes_back_n() {
    let mut link = Link::new(10, 4, DropOnce::fresh([2]));

    link.settle();
    assert_eq!(link.accepted, vec![0, 1]);
    assert_eq!(link.discarded, vec![3, 4, 5], "gap packets are discarded");
    assert_eq!((link.sender.base, link.sender.next_seq), (2, 6));

    link.run_to_completion().await;
    assert_eq!(link.resends, vec![vec![2, 3, 4, 5]]);
    assert_eq!(link.accepted, (0..10).collect::<Vec<_>>());
    assert_eq!(link.sender.report().timeouts, 1);
    assert_eq!(link.sender.report().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn nothing_resent_before_timeout() {
    let mut link = Link::new(10, 4, DropOnce::fresh([2]));
    link.settle();

    tokio::time::advance(RTO - Duration::from_millis(1)).await;
    assert!(link.sender.on_timeout().is_none());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(link.sender.on_timeout().is_some());
}

#[tokio::test(start_paused = true)]
async fn dropped_retransmission_needs_second_timeout() {
    let mut link = Link::new(6, 4, DropOnce::new([
        Transmission::fresh(0),
        Transmission::retransmit(0),
    ]));
    link.run_to_completion().await;

    assert_eq!(link.resends.len(), 2);
    assert_eq!(link.resends[0], vec![0, 1, 2, 3]);
    assert_eq!(link.resends[1], vec![0, 1, 2, 3]);
    assert_eq!(link.accepted, (0..6).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Scenario C: duplicate ACK
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicate_ack_changes_nothing() {
    let mut link = Link::new(10, 4, NeverDrop);
    link.settle();
    let (base, next) = (link.sender.base, link.sender.next_seq);

    for dup in [0, 3, base - 1] {
        assert_eq!(link.sender.on_ack(dup), AckOutcome::Ignored);
        assert_eq!((link.sender.base, link.sender.next_seq), (base, next));
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn random_loss_preserves_order_and_unique_acks() {
    for seed in 0..32 {
        let mut link = Link::new(40, 5, RandomLoss::new(0.3, Some(seed)));
        link.run_to_completion().await;

        assert_eq!(link.accepted, (0..40).collect::<Vec<_>>(), "seed {seed}");
        // No ACK is ever emitted twice, and each follows its acceptance.
        assert_eq!(link.ack_log, link.accepted, "seed {seed}");
        assert_eq!(link.sender.base, 40);
    }
}

#[tokio::test(start_paused = true)]
async fn acks_in_any_order_converge() {
    // Every rotation of 0..=k delivered to a full window.
    let k = 3u64;
    for rotation in 0..=k {
        let data = [0u8; 8];
        let mut s = SenderWindow::new(0, &data, 1, 4, RTO);
        s.fill();
        let order: Vec<u64> = (0..=k).map(|i| (i + rotation) % (k + 1)).collect();
        for ack in order.iter().rev() {
            s.on_ack(*ack);
        }
        assert_eq!(s.base, k + 1, "order {order:?}");
        assert!(s.ack_record().iter().all(|&b| !b), "order {order:?}");
    }
}
