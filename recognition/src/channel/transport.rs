//! Line transports behind the [`Connector`] seam.
//!
//! A [`Connection`] is a pair of line queues plus a shutdown token. The TCP
//! connector bridges them to a socket with one reader and one writer task;
//! the memory connector hands the other ends to a test peer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::wire::{self, Envelope, PredictionEvent};
use super::{ChannelError, ChannelResult};

/// Queued outbound lines before sends report backpressure.
pub const OUTBOUND_CAPACITY: usize = 32;
/// Queued inbound lines before the transport stops reading.
pub const INBOUND_CAPACITY: usize = 64;

/// An established line-oriented link.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
    /// Cancelling tears down any transport tasks.
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> ChannelResult<Connection>;
}

/// Newline-delimited JSON over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> ChannelResult<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| ChannelError::Timeout(endpoint.to_string()))?
            .map_err(|source| ChannelError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint, error = %e, "Could not disable Nagle");
        }

        let (read_half, mut write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_CAPACITY);
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let peer = endpoint.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    line = out_rx.recv() => {
                        let Some(line) = line else { break };
                        let write = async {
                            write_half.write_all(line.as_bytes()).await?;
                            write_half.write_all(b"\n").await?;
                            write_half.flush().await
                        };
                        if let Err(e) = write.await {
                            debug!(endpoint = %peer, error = %e, "Write failed, closing writer");
                            break;
                        }
                    }
                }
            }
            let _ = write_half.shutdown().await;
        });

        let token = shutdown.clone();
        let peer = endpoint.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if in_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(endpoint = %peer, "Backend closed the connection");
                            break;
                        }
                        Err(e) => {
                            debug!(endpoint = %peer, error = %e, "Read failed, closing reader");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
        })
    }
}

/// In-process connector. Each successful connect yields a [`MemoryPeer`]
/// on the paired [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse_next: AtomicU32,
    attempts: AtomicU32,
    latency: Duration,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, MemoryServer) {
        Self::with_latency(Duration::ZERO)
    }

    /// Each connect takes `latency` before it resolves.
    pub fn with_latency(latency: Duration) -> (Arc<Self>, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers: tx,
            refuse_next: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            latency,
        });
        (connector, MemoryServer { peers: rx })
    }

    /// Fail the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Connect attempts so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> ChannelResult<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::Refused(endpoint.to_string()));
        }

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let shutdown = CancellationToken::new();

        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            to_client: in_tx,
            from_client: out_rx,
            shutdown: shutdown.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| ChannelError::Refused(endpoint.to_string()))?;

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
        })
    }
}

/// Accepts peers created by a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// A peer that already connected, without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// Backend side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    pub endpoint: String,
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
    shutdown: CancellationToken,
}

impl MemoryPeer {
    /// Next request from the client. `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let line = self.from_client.recv().await?;
            match serde_json::from_str(&line) {
                Ok(envelope) => return Some(envelope),
                Err(e) => debug!(error = %e, "Peer ignored malformed line"),
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        let line = self.from_client.try_recv().ok()?;
        serde_json::from_str(&line).ok()
    }

    pub async fn send_line(&self, line: String) -> bool {
        self.to_client.send(line).await.is_ok()
    }

    pub async fn send_prediction(&self, event: &PredictionEvent) -> bool {
        match wire::prediction_line(event) {
            Ok(line) => self.send_line(line).await,
            Err(_) => false,
        }
    }

    /// Whether the client side has torn the link down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.to_client.is_closed()
    }

    /// Drop the connection from the backend side.
    pub fn close(self) {
        drop(self);
    }
}
