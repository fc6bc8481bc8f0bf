//! Loss simulation for exercising the GBN recovery paths.
//!
//! Every data transmission (fresh or retransmitted) is offered to a
//! [`LossPolicy`] first.  If the policy votes to drop it, the bytes are never
//! handed to the socket; from the window's point of view the packet was still
//! "sent", and the retransmission timer is what recovers it.
//!
//! ACKs are deliberately never offered to the policy: the receiver never
//! repeats an ACK, so losing the ACK for the last packet of a stream would
//! leave the sender retransmitting forever.
//!
//! | Policy         | Behaviour                                        |
//! |----------------|--------------------------------------------------|
//! | [`NeverDrop`]  | Transparent pass-through.                        |
//! | [`RandomLoss`] | Drop with fixed probability (optionally seeded). |
//! | [`DropOnce`]   | Drop a scripted set of transmissions once each.  |

use std::collections::HashSet;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Why a packet is being put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionKind {
    /// First transmission while filling the window.
    Fresh,
    /// Go-back-N resend after a timeout.
    Retransmit,
}

/// One physical transmission attempt offered to a [`LossPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transmission {
    pub kind: TransmissionKind,
    pub seq: u64,
}

impl Transmission {
    pub fn fresh(seq: u64) -> Self {
        Self {
            kind: TransmissionKind::Fresh,
            seq,
        }
    }

    pub fn retransmit(seq: u64) -> Self {
        Self {
            kind: TransmissionKind::Retransmit,
            seq,
        }
    }
}

/// Fault-injection decision consulted once per data transmission.
pub trait LossPolicy: Send + Sync {
    /// `true` to silently discard this transmission.
    fn should_drop(&self, tx: &Transmission) -> bool;
}

/// Lossless channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDrop;

impl LossPolicy for NeverDrop {
    fn should_drop(&self, _tx: &Transmission) -> bool {
        false
    }
}

/// Bernoulli loss: each transmission is dropped with probability `p`.
#[derive(Debug)]
pub struct RandomLoss {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomLoss {
    /// `probability` is clamped to `[0.0, 1.0]`.  A `seed` makes the drop
    /// sequence reproducible.
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl LossPolicy for RandomLoss {
    fn should_drop(&self, _tx: &Transmission) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        // A poisoned lock only means another thread panicked mid-draw; the
        // RNG state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_bool(self.probability)
    }
}

/// Scripted loss: each listed transmission is dropped the first time it is
/// attempted and delivered on every later attempt.
#[derive(Debug, Default)]
pub struct DropOnce {
    pending: Mutex<HashSet<Transmission>>,
}

impl DropOnce {
    pub fn new(script: impl IntoIterator<Item = Transmission>) -> Self {
        Self {
            pending: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Drop the first fresh transmission of each listed sequence number.
    pub fn fresh(seqs: impl IntoIterator<Item = u64>) -> Self {
        Self::new(seqs.into_iter().map(Transmission::fresh))
    }

    /// Scripted drops that have not fired yet.
    pub fn remaining(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl LossPolicy for DropOnce {
    fn should_drop(&self, tx: &Transmission) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_drop_passes_everything() {
        let p = NeverDrop;
        assert!((0..100).all(|s| !p.should_drop(&Transmission::fresh(s))));
    }

    #[test]
    fn random_loss_extremes() {
        let none = RandomLoss::new(0.0, Some(1));
        let all = RandomLoss::new(1.0, Some(1));
        for s in 0..100 {
            assert!(!none.should_drop(&Transmission::fresh(s)));
            assert!(all.should_drop(&Transmission::fresh(s)));
        }
    }

    #[test]
    fn random_loss_seed_is_reproducible() {
        let a = RandomLoss::new(0.2, Some(42));
        let b = RandomLoss::new(0.2, Some(42));
        let run = |p: &RandomLoss| -> Vec<bool> {
            (0..64).map(|s| p.should_drop(&Transmission::fresh(s))).collect()
        };
        assert_eq!(run(&a), run(&b));
    }

    #[test]
    fn random_loss_rate_is_roughly_p() {
        let p = RandomLoss::new(0.2, Some(7));
        let drops = (0..10_000)
            .filter(|&s| p.should_drop(&Transmission::fresh(s)))
            .count();
        assert!((1500..2500).contains(&drops), "drops = {drops}");
    }

    #[test]
    fn probability_is_clamped() {
        assert_eq!(RandomLoss::new(3.0, Some(0)).probability(), 1.0);
        assert_eq!(RandomLoss::new(-1.0, Some(0)).probability(), 0.0);
    }

    #[test]
    fn drop_once_fires_once_per_entry() {
        let p = DropOnce::fresh([2]);
        assert!(!p.should_drop(&Transmission::fresh(1)));
        assert!(p.should_drop(&Transmission::fresh(2)));
        assert!(!p.should_drop(&Transmission::fresh(2)));
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn drop_once_distinguishes_kind() {
        let p = DropOnce::new([Transmission::retransmit(0)]);
        assert!(!p.should_drop(&Transmission::fresh(0)));
        assert!(p.should_drop(&Transmission::retransmit(0)));
    }
}
