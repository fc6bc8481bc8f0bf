//! `gbn-over-udp`: reliable, ordered byte delivery over UDP using Go-Back-N.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   data packets   ┌───────────────────┐
//!  │ SenderWindow │─────────────────▶│ ReceiverSequencer │
//!  └──────▲───────┘                  └─────────┬─────────┘
//!         │            ACKs                    │
//!         └────────────────────────────────────┘
//!  ┌───────────────────────────────────────────────────┐
//!  │                      Peer                         │
//!  │  (one window + one sequencer, inbound/outbound    │
//!  │   tasks sharing one socket)                       │
//!  └──────┬────────────────────────────────────────────┘
//!         │ raw UDP datagrams
//!  ┌──────▼────┐   ┌─────────────┐
//!  │  Socket   │◀──│ LossPolicy  │  (fault injection on send)
//!  └───────────┘   └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: text wire format (`"seq:payload"` / `"ack"`)
//! - [`config`]: runtime parameters and validation
//! - [`timer`]: single-shot retransmission timer
//! - [`simulator`]: loss policies for fault injection
//! - [`socket`]: async UDP socket abstraction
//! - [`gbn_sender`]: GBN outbound window state machine
//! - [`gbn_receiver`]: GBN inbound in-order acceptance
//! - [`peer`]: concurrent send/receive engine for one peer pair

pub mod config;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod peer;
pub mod simulator;
pub mod socket;
pub mod timer;

pub use config::GbnConfig;
pub use peer::{Peer, PeerError, PeerSender, PeerSession};
