//! Runtime parameters for a GBN peer.
//!
//! Every constant the protocol depends on lives in [`GbnConfig`] so the CLI
//! and tests can override it.  [`GbnConfig::validate`] rejects combinations
//! that could never work (e.g. a segment that cannot fit the receive buffer).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_OVERHEAD;
use crate::simulator::{LossPolicy, NeverDrop, RandomLoss};

/// Datagram sent by the connecting side so the listener learns its address.
pub const DEFAULT_HELLO: &str = "Client connected";

/// Adjustable protocol parameters.
#[derive(Debug, Clone)]
pub struct GbnConfig {
    /// GBN window size N: maximum number of outstanding packets.
    pub window_size: usize,
    /// Retransmission timeout, measured from the oldest outstanding packet.
    pub timeout: Duration,
    /// Re-evaluation cadence of the send loop when no event arrives.
    pub pacing: Duration,
    /// Probability in `[0.0, 1.0]` that a data transmission is dropped.
    pub loss_probability: f64,
    /// Seed for the loss RNG; `None` seeds from the OS.
    pub loss_seed: Option<u64>,
    /// Receive buffer capacity; every datagram must fit.
    pub recv_buffer: usize,
    /// Payload bytes carried by one data packet.
    pub segment_size: usize,
    /// Consecutive timeouts tolerated without progress; `None` = unbounded.
    pub max_retries: Option<u32>,
    /// Rendezvous datagram sent by [`crate::peer::Peer::connect`].
    pub hello: String,
}

impl Default for GbnConfig {
    fn default() -> Self {
        Self {
            window_size: 4,
            timeout: Duration::from_millis(2000),
            pacing: Duration::from_millis(500),
            loss_probability: 0.2,
            loss_seed: None,
            recv_buffer: 1024,
            segment_size: 8,
            max_retries: None,
            hello: DEFAULT_HELLO.to_string(),
        }
    }
}

/// Reasons a [`GbnConfig`] is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("timeout must be non-zero")]
    ZeroTimeout,
    #[error("pacing interval must be non-zero")]
    ZeroPacing,
    #[error("segment size must be at least 1")]
    ZeroSegment,
    #[error("loss probability {0} is outside [0, 1]")]
    BadProbability(f64),
    #[error("segment of {segment} bytes plus framing exceeds receive buffer {buffer}")]
    SegmentTooLarge { segment: usize, buffer: usize },
    #[error("rendezvous message of {len} bytes exceeds receive buffer {buffer}")]
    HelloTooLarge { len: usize, buffer: usize },
}

impl GbnConfig {
    /// Lossless variant of the defaults, convenient for tests.
    pub fn lossless() -> Self {
        Self {
            loss_probability: 0.0,
            ..Self::default()
        }
    }

    /// Loss policy described by `loss_probability` / `loss_seed`.
    pub fn loss_policy(&self) -> Arc<dyn LossPolicy> {
        if self.loss_probability <= 0.0 {
            Arc::new(NeverDrop)
        } else {
            Arc::new(RandomLoss::new(self.loss_probability, self.loss_seed))
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.pacing.is_zero() {
            return Err(ConfigError::ZeroPacing);
        }
        if self.segment_size == 0 {
            return Err(ConfigError::ZeroSegment);
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ConfigError::BadProbability(self.loss_probability));
        }
        if self.segment_size + MAX_OVERHEAD > self.recv_buffer {
            return Err(ConfigError::SegmentTooLarge {
                segment: self.segment_size,
                buffer: self.recv_buffer,
            });
        }
        if self.hello.len() > self.recv_buffer {
            return Err(ConfigError::HelloTooLarge {
                len: self.hello.len(),
                buffer: self.recv_buffer,
            });
        }
        Ok(())
    }
}
