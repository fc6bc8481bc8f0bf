//! Entry point for `gbn-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **listen** or **connect**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, signal handling, argument parsing).
//!
//! Exit status: `0` on clean shutdown, `1` on any fatal error.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use gbn_over_udp::socket::Socket;
use gbn_over_udp::{GbnConfig, Peer, PeerSession};

/// Go-Back-N reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer to announce itself, then exchange data.
    Listen {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:12345")]
        bind: SocketAddr,
        #[command(flatten)]
        opts: Opts,
    },
    /// Announce ourselves to a listening peer, then exchange data.
    Connect {
        /// Remote peer address.
        #[arg(short, long, default_value = "127.0.0.1:12345")]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:12346")]
        bind: SocketAddr,
        #[command(flatten)]
        opts: Opts,
    },
}

#[derive(Args)]
struct Opts {
    /// Text to send reliably once paired.
    #[arg(short, long)]
    message: Option<String>,
    /// Exit after the message is acknowledged instead of serving until Ctrl-C.
    #[arg(long)]
    exit_after_send: bool,
    /// GBN window size.
    #[arg(long, default_value_t = 4)]
    window: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Send-loop pacing interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    pacing_ms: u64,
    /// Probability of dropping each data transmission.
    #[arg(long, default_value_t = 0.2)]
    loss: f64,
    /// Seed for the loss simulator.
    #[arg(long)]
    seed: Option<u64>,
    /// Payload bytes per packet.
    #[arg(long, default_value_t = 8)]
    segment_size: usize,
    /// Receive buffer capacity in bytes.
    #[arg(long, default_value_t = 1024)]
    recv_buffer: usize,
    /// Give up after this many consecutive timeouts (default: never).
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Opts {
    fn config(&self) -> GbnConfig {
        GbnConfig {
            window_size: self.window,
            timeout: Duration::from_millis(self.timeout_ms),
            pacing: Duration::from_millis(self.pacing_ms),
            loss_probability: self.loss,
            loss_seed: self.seed,
            recv_buffer: self.recv_buffer,
            segment_size: self.segment_size,
            max_retries: self.max_retries,
            ..GbnConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Timestamped protocol trace; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (peer, opts) = match cli.mode {
        Mode::Listen { bind, opts } => {
            let config = opts.config();
            config.validate().context("invalid configuration")?;
            let socket = Socket::bind(bind, config.recv_buffer)
                .await
                .with_context(|| format!("cannot bind {bind}"))?;
            let loss = config.loss_policy();
            (Peer::accept(socket, config, loss).await?, opts)
        }
        Mode::Connect { peer, bind, opts } => {
            let config = opts.config();
            config.validate().context("invalid configuration")?;
            let socket = Socket::bind(bind, config.recv_buffer)
                .await
                .with_context(|| format!("cannot bind {bind}"))?;
            let loss = config.loss_policy();
            (Peer::connect(socket, peer, config, loss).await?, opts)
        }
    };

    let session = peer.run();
    serve(session, opts).await
}

/// Print everything the peer delivers while our own message goes out.
async fn serve(mut session: PeerSession, opts: Opts) -> Result<()> {
    let message = opts.message.unwrap_or_default();
    let mut sent = message.is_empty();
    let sender = session.sender();
    let send = async move { sender.send(message.into_bytes()).await };
    // Created once so a signal landing between loop passes is not lost.
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(send, interrupt);

    loop {
        tokio::select! {
            result = &mut send, if !sent => {
                sent = true;
                let report = result.context("send failed")?;
                log::info!("[gbn] message delivered: {report:?}");
                if opts.exit_after_send {
                    break;
                }
            }
            chunk = session.recv() => match chunk {
                Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                None => break,
            },
            _ = &mut interrupt => {
                log::info!("[gbn] interrupted, shutting down");
                break;
            }
        }
    }

    session.shutdown().await.context("transport failure")
}
