//! Peer engine: one send window and one receive sequencer sharing a socket.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send(data)                 recv()
//!      ▼                              ▲
//!  submit channel               delivery channel
//!      │                              │
//!  ┌───▼──────────────┐  ACK numbers ┌┴──────────────────┐
//!  │  outbound task   │◀─────────────│   inbound task     │
//!  │  SenderWindow    │   (mpsc)     │ ReceiverSequencer  │
//!  │  + timer         │              │ demux data / ACK   │
//!  └───┬──────────────┘              └┬──────────────────┘
//!      │ data packets          ACKs   │ ▲ datagrams
//!      └──────────────▶ Arc<Socket> ◀─┘ │
//!                             └─────────┘
//! ```
//!
//! The send window is owned by the outbound task alone; the inbound task
//! forwards every ACK it decodes over a channel, so slide-on-ACK and
//! fill-on-send are serialised without a lock.  The receive sequencer is
//! likewise confined to the inbound task, which also sends the ACKs.
//!
//! # Usage
//!
//! ```ignore
//! let config = GbnConfig::default();
//! let socket = Socket::bind("0.0.0.0:12346".parse()?, config.recv_buffer).await?;
//! let loss = config.loss_policy();
//! let mut session = Peer::connect(socket, server, config, loss).await?.run();
//! let report = session.send(b"hello".to_vec()).await?;
//! let chunk = session.recv().await;
//! session.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ConfigError, GbnConfig};
use crate::gbn_receiver::{ReceiverSequencer, Verdict};
use crate::gbn_sender::{AckOutcome, SendReport, SenderWindow};
use crate::packet::{Datagram, Packet};
use crate::simulator::{LossPolicy, Transmission, TransmissionKind};
use crate::socket::{is_transient, Socket, SocketError};

/// Depth of the queue of streams waiting for the send window.
const SUBMIT_QUEUE: usize = 16;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The retry ceiling was hit without the window making progress.
    #[error("no acknowledgement after {0} consecutive retransmissions")]
    MaxRetriesExceeded(u32),
    #[error("peer session shut down")]
    Shutdown,
    /// The inbound task stopped, so no further ACK can arrive.
    #[error("receive loop has stopped")]
    ReceiveLoopStopped,
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// A paired endpoint, ready to [`run`](Peer::run).
pub struct Peer {
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: GbnConfig,
    loss: Arc<dyn LossPolicy>,
}

impl Peer {
    /// Pair `socket` with a known remote address.
    pub fn new(
        socket: Socket,
        peer: SocketAddr,
        config: GbnConfig,
        loss: Arc<dyn LossPolicy>,
    ) -> Result<Self, PeerError> {
        config.validate()?;
        Ok(Self {
            socket: Arc::new(socket),
            peer,
            config,
            loss,
        })
    }

    /// Active side: announce ourselves with the rendezvous datagram.
    pub async fn connect(
        socket: Socket,
        peer: SocketAddr,
        config: GbnConfig,
        loss: Arc<dyn LossPolicy>,
    ) -> Result<Self, PeerError> {
        let this = Self::new(socket, peer, config, loss)?;
        this.socket
            .send_raw(this.config.hello.as_bytes(), peer)
            .await?;
        log::info!("[gbn] connected to {peer}");
        Ok(this)
    }

    /// Passive side: pair with whoever sends the first datagram.
    pub async fn accept(
        socket: Socket,
        config: GbnConfig,
        loss: Arc<dyn LossPolicy>,
    ) -> Result<Self, PeerError> {
        config.validate()?;
        log::info!("[gbn] waiting for a peer on {}", socket.local_addr);
        let (hello, peer) = socket.recv_raw().await?;
        log::info!(
            "[gbn] peer {peer} connected ({:?})",
            String::from_utf8_lossy(&hello)
        );
        Self::new(socket, peer, config, loss)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Spawn the inbound and outbound tasks and return the session handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(self) -> PeerSession {
        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inbound = tokio::spawn(
            Inbound {
                socket: Arc::clone(&self.socket),
                peer: self.peer,
                ack_tx,
                deliver_tx,
            }
            .run(shutdown_rx.clone()),
        );
        let outbound = tokio::spawn(
            Outbound {
                socket: Arc::clone(&self.socket),
                peer: self.peer,
                config: self.config,
                loss: self.loss,
            }
            .run(submit_rx, ack_rx, shutdown_rx),
        );

        PeerSession {
            local_addr: self.socket.local_addr,
            peer_addr: self.peer,
            sender: PeerSender { submit_tx },
            deliver_rx,
            shutdown_tx,
            inbound,
            outbound,
        }
    }
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

struct SubmitRequest {
    data: Vec<u8>,
    reply: oneshot::Sender<Result<SendReport, PeerError>>,
}

/// Cloneable submit handle, usable while the session itself is busy in
/// [`PeerSession::recv`].
#[derive(Clone)]
pub struct PeerSender {
    submit_tx: mpsc::Sender<SubmitRequest>,
}

impl PeerSender {
    /// Deliver `data` reliably; resolves once every packet is acknowledged.
    ///
    /// Streams submitted concurrently are sent one after another.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<SendReport, PeerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit_tx
            .send(SubmitRequest {
                data: data.into(),
                reply,
            })
            .await
            .map_err(|_| PeerError::Shutdown)?;
        reply_rx.await.unwrap_or(Err(PeerError::Shutdown))
    }
}

/// Handle returned by [`Peer::run`].
///
/// Dropping the handle without calling [`shutdown`](PeerSession::shutdown)
/// also stops both tasks, but any transport error is then lost.
pub struct PeerSession {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    sender: PeerSender,
    deliver_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    inbound: JoinHandle<Result<(), PeerError>>,
    outbound: JoinHandle<()>,
}

impl PeerSession {
    /// See [`PeerSender::send`].
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<SendReport, PeerError> {
        self.sender.send(data).await
    }

    pub fn sender(&self) -> PeerSender {
        self.sender.clone()
    }

    /// Next chunk of in-order bytes from the peer.
    ///
    /// Returns `None` once the receive loop has stopped.
    ///
    /// The delivery queue is unbounded: accepted payloads are held until
    /// read, so a session that never calls `recv` buffers every byte the
    /// peer sends.  The inbound task that fills it also forwards this side's
    /// ACKs and must never block on it.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.deliver_rx.recv().await
    }

    /// Stop both tasks and wait for them.
    ///
    /// Returns the fatal transport error that ended the receive loop, if any.
    pub async fn shutdown(self) -> Result<(), PeerError> {
        // Err only means both tasks already exited.
        let _ = self.shutdown_tx.send(true);
        drop(self.sender);

        self.outbound
            .await
            .map_err(|e| PeerError::TaskFailed(e.to_string()))?;
        match self.inbound.await {
            Ok(result) => result,
            Err(e) => Err(PeerError::TaskFailed(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound task
// ---------------------------------------------------------------------------

struct Inbound {
    socket: Arc<Socket>,
    peer: SocketAddr,
    ack_tx: mpsc::UnboundedSender<u64>,
    deliver_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Inbound {
    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), PeerError> {
        let mut receiver = ReceiverSequencer::new();

        loop {
            let (decoded, addr) = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.socket.recv_from() => match result {
                    Ok(v) => v,
                    Err(SocketError::Io(e)) if is_transient(&e) => {
                        log::warn!("[gbn:recv] transient receive error: {e}");
                        continue;
                    }
                    Err(e) => {
                        log::error!("[gbn:recv] receive failed: {e}");
                        return Err(e.into());
                    }
                },
            };

            if addr != self.peer {
                log::debug!("[gbn:recv] ignoring datagram from unknown address {addr}");
                continue;
            }

            match decoded {
                Err(e) => {
                    log::warn!("[gbn:recv] discarding malformed datagram: {e}");
                }
                Ok(Datagram::Ack(ack)) => {
                    log::debug!("[gbn:recv] ← ACK {}", ack.ack);
                    // The outbound task only goes away during shutdown.
                    let _ = self.ack_tx.send(ack.ack);
                }
                Ok(Datagram::Data(pkt)) => self.on_data(&mut receiver, pkt).await?,
            }
        }

        log::debug!("[gbn:recv] receive loop stopped");
        Ok(())
    }

    async fn on_data(
        &self,
        receiver: &mut ReceiverSequencer,
        pkt: Packet,
    ) -> Result<(), PeerError> {
        match receiver.on_packet(&pkt) {
            Verdict::Accepted(ack) => {
                log::info!(
                    "[gbn:recv] packet received: seq={} len={}",
                    pkt.seq,
                    pkt.payload.len()
                );
                match self.socket.send_to(&Datagram::Ack(ack), self.peer).await {
                    Ok(()) => log::info!("[gbn:recv] → ACK {}", ack.ack),
                    Err(SocketError::Io(e)) if is_transient(&e) => {
                        log::warn!("[gbn:recv] ACK {} not sent: {e}", ack.ack);
                    }
                    Err(e) => return Err(e.into()),
                }
                // Unbounded; see `PeerSession::recv`.  The application may
                // have dropped its handle, so keep ACKing regardless.
                let _ = self.deliver_tx.send(receiver.take());
            }
            Verdict::Duplicate { expected } | Verdict::OutOfOrder { expected } => {
                log::info!(
                    "[gbn:recv] out of order packet discarded: seq={} (expected {expected})",
                    pkt.seq
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound task
// ---------------------------------------------------------------------------

struct Outbound {
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: GbnConfig,
    loss: Arc<dyn LossPolicy>,
}

impl Outbound {
    async fn run(
        self,
        mut submit_rx: mpsc::Receiver<SubmitRequest>,
        mut ack_rx: mpsc::UnboundedReceiver<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Streams continue one shared sequence space so the peer's expected
        // sequence number, which is never reset, keeps matching.
        let mut next_stream_seq = 0u64;

        loop {
            let req = tokio::select! {
                _ = shutdown.changed() => break,
                req = submit_rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
                ack = ack_rx.recv() => match ack {
                    Some(ack) => {
                        log::debug!("[gbn:send] stale ACK {ack} with no stream in flight");
                        continue;
                    }
                    None => break,
                },
            };

            let mut window = SenderWindow::new(
                next_stream_seq,
                &req.data,
                self.config.segment_size,
                self.config.window_size,
                self.config.timeout,
            );
            log::info!(
                "[gbn:send] stream of {} bytes as {} packet(s) from seq {}",
                req.data.len(),
                window.end() - next_stream_seq,
                next_stream_seq
            );

            let result = self.drive(&mut window, &mut ack_rx, &mut shutdown).await;
            let failed = result.is_err();
            // The submitter may have given up waiting.
            let _ = req.reply.send(result.map(|()| window.report()));

            if failed {
                // The peer's expected sequence number is now unknown.
                log::warn!("[gbn:send] stream aborted at base {}; send path closed", window.base);
                break;
            }
            next_stream_seq = window.end();
        }

        log::debug!("[gbn:send] send loop stopped");
    }

    /// Run one stream to completion.
    async fn drive(
        &self,
        window: &mut SenderWindow,
        ack_rx: &mut mpsc::UnboundedReceiver<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), PeerError> {
        let mut pacing = tokio::time::interval(self.config.pacing);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        pacing.tick().await;

        loop {
            for pkt in window.fill() {
                self.transmit(window, pkt, TransmissionKind::Fresh).await;
            }
            if window.is_complete() {
                let r = window.report();
                log::info!(
                    "[gbn:send] stream acknowledged: {} packet(s), {} retransmission(s), {} lost",
                    r.packets,
                    r.retransmissions,
                    r.dropped
                );
                return Ok(());
            }

            if let Some(resend) = window.on_timeout() {
                if let Some(max) = self.config.max_retries {
                    if window.retries() > max {
                        return Err(PeerError::MaxRetriesExceeded(max));
                    }
                }
                log::warn!(
                    "[gbn:send] timeout, resending packets {}..{}",
                    window.base,
                    window.next_seq
                );
                for pkt in resend {
                    self.transmit(window, pkt, TransmissionKind::Retransmit).await;
                }
            }

            let deadline = window.deadline();
            tokio::select! {
                _ = shutdown.changed() => return Err(PeerError::Shutdown),
                ack = ack_rx.recv() => {
                    let ack = ack.ok_or(PeerError::ReceiveLoopStopped)?;
                    match window.on_ack(ack) {
                        AckOutcome::Accepted { slid } => log::debug!(
                            "[gbn:send] ACK {ack} slid={slid} base={} next={}",
                            window.base,
                            window.next_seq
                        ),
                        AckOutcome::Ignored => log::debug!(
                            "[gbn:send] ACK {ack} outside window [{}, {})",
                            window.base,
                            window.next_seq
                        ),
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {}
                _ = pacing.tick() => {}
            }
        }
    }

    /// Offer one packet to the loss policy, then to the socket.
    ///
    /// Send failures are logged and counted as losses; the retransmission
    /// timer recovers them like any other drop.
    async fn transmit(&self, window: &mut SenderWindow, pkt: Packet, kind: TransmissionKind) {
        let tx = Transmission { kind, seq: pkt.seq };
        let verb = match kind {
            TransmissionKind::Fresh => "sent",
            TransmissionKind::Retransmit => "retransmitted",
        };

        if self.loss.should_drop(&tx) {
            log::info!("[gbn:send] packet lost (simulated): seq={}", tx.seq);
            window.note_transmission(&tx, true);
            return;
        }

        match self.socket.send_to(&Datagram::Data(pkt), self.peer).await {
            Ok(()) => {
                log::info!("[gbn:send] packet {verb}: seq={}", tx.seq);
                window.note_transmission(&tx, false);
            }
            Err(e) => {
                log::warn!("[gbn:send] packet seq={} not {verb}: {e}", tx.seq);
                window.note_transmission(&tx, true);
            }
        }
    }
}

/// Placeholder deadline for a disabled timer branch.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(365 * 24 * 3600)
}
