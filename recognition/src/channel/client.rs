//! Per-domain recognition channel.
//!
//! Connection state machine:
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──ok──> Connected
//!                                  │                 │ link lost
//!                                  └─retries spent─> Degraded
//!                                                    Disconnected <─┘
//! ```
//!
//! Connect attempts are serialized behind an async mutex. A caller that
//! queued behind an in-flight attempt returns that attempt's result instead
//! of starting its own, so concurrent `connect()` calls never open parallel
//! sockets.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{Connection, Connector};
use super::wire::{self, Inbound, PredictRequest, PredictionEvent};
use crate::domain::Domain;
use crate::resilience::{retry, RetryPolicy};

/// Buffered predictions per listener before the oldest are skipped.
const PREDICTION_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Retries exhausted. Sends are dropped and no predictions arrive.
    Degraded,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// What happened to a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Dropped because no link is up.
    NotConnected,
    /// Dropped because the transport queue is full.
    Backpressure,
}

struct Link {
    id: u64,
    outbound: mpsc::Sender<String>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
}

struct Inner {
    domain: Domain,
    endpoint: String,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    connect_lock: tokio::sync::Mutex<()>,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
    attempts_finished: AtomicU64,
    ever_connected: AtomicBool,
    reconnect_pending: AtomicBool,
    closed: AtomicBool,
    status: watch::Sender<ChannelStatus>,
    predictions: broadcast::Sender<PredictionEvent>,
}

/// Cheaply cloneable handle; clones share one connection.
#[derive(Clone)]
pub struct RecognitionChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for RecognitionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionChannel")
            .field("domain", &self.inner.domain)
            .field("endpoint", &self.inner.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

impl RecognitionChannel {
    pub fn new(
        domain: Domain,
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        retry: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        let (predictions, _) = broadcast::channel(PREDICTION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                domain,
                endpoint: endpoint.into(),
                connector,
                retry,
                connect_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(None),
                next_link_id: AtomicU64::new(1),
                attempts_finished: AtomicU64::new(0),
                ever_connected: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                status,
                predictions,
            }),
        }
    }

    pub fn domain(&self) -> Domain {
        self.inner.domain
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    /// Status updates for presentation.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.with_link(|link| link.is_some())
    }

    /// Establish the link, retrying per the channel's policy.
    ///
    /// Never fails: an exhausted policy leaves the channel `Degraded`.
    pub async fn connect(&self) -> ChannelStatus {
        self.establish(true).await
    }

    /// Background path. Leaves a channel that was closed on purpose closed.
    async fn reconnect(&self) -> ChannelStatus {
        self.establish(false).await
    }

    async fn establish(&self, reopen: bool) -> ChannelStatus {
        let seen = self.inner.attempts_finished.load(Ordering::SeqCst);
        let _guard = self.inner.connect_lock.lock().await;

        if self.is_connected() {
            return ChannelStatus::Connected;
        }
        if self.inner.attempts_finished.load(Ordering::SeqCst) != seen {
            // Someone else's attempt finished while we waited.
            return self.status();
        }
        if reopen {
            self.inner.closed.store(false, Ordering::SeqCst);
        } else if self.inner.closed.load(Ordering::SeqCst) {
            debug!(domain = %self.inner.domain, "Channel closed, skipping reconnect");
            return self.status();
        }

        self.set_status(ChannelStatus::Connecting);
        let domain = self.inner.domain;
        let endpoint = self.inner.endpoint.clone();
        let connector = self.inner.connector.clone();

        let result = retry(&self.inner.retry, "channel connect", |attempt| {
            let connector = connector.clone();
            let endpoint = endpoint.clone();
            async move {
                debug!(domain = %domain, endpoint = %endpoint, attempt, "Connecting");
                connector.connect(&endpoint).await
            }
        })
        .await;
        self.inner.attempts_finished.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(connection) if !self.inner.closed.load(Ordering::SeqCst) => {
                self.install(connection);
                self.inner.ever_connected.store(true, Ordering::SeqCst);
                info!(domain = %domain, endpoint = %endpoint, "Recognition channel connected");
                self.set_status(ChannelStatus::Connected);
                ChannelStatus::Connected
            }
            Ok(connection) => {
                // disconnect() raced the attempt
                connection.shutdown.cancel();
                self.set_status(ChannelStatus::Disconnected);
                ChannelStatus::Disconnected
            }
            Err(e) => {
                warn!(
                    domain = %domain,
                    endpoint = %endpoint,
                    error = %e,
                    "Recognition channel degraded"
                );
                self.set_status(ChannelStatus::Degraded);
                ChannelStatus::Degraded
            }
        }
    }

    /// Tear the link down and wait for the reader to stop. No reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let link = self.take_link(None);
        if let Some(link) = link {
            link.shutdown.cancel();
            drop(link.outbound);
            if let Err(e) = link.reader.await {
                debug!(domain = %self.inner.domain, error = %e, "Reader task ended abnormally");
            }
            info!(domain = %self.inner.domain, "Recognition channel disconnected");
        }
        self.set_status(ChannelStatus::Disconnected);
    }

    /// Fire-and-forget send.
    ///
    /// Drops the payload when not connected. If the channel was connected
    /// before and was not closed on purpose, one background reconnect is
    /// scheduled.
    pub fn send(&self, request: &PredictRequest) -> SendOutcome {
        let line = match request.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(domain = %self.inner.domain, error = %e, "Could not encode request");
                return SendOutcome::NotConnected;
            }
        };

        let attempt = self.with_link(|link| {
            link.as_ref()
                .map(|l| (l.id, l.outbound.try_send(line)))
        });

        match attempt {
            Some((_, Ok(()))) => {
                debug!(domain = %self.inner.domain, frames = request.frame_count(), "Request sent");
                SendOutcome::Sent
            }
            Some((_, Err(mpsc::error::TrySendError::Full(_)))) => {
                debug!(domain = %self.inner.domain, "Transport queue full, request dropped");
                SendOutcome::Backpressure
            }
            Some((id, Err(mpsc::error::TrySendError::Closed(_)))) => {
                self.connection_lost(id);
                self.schedule_reconnect();
                SendOutcome::NotConnected
            }
            None => {
                debug!(domain = %self.inner.domain, "Not connected, request dropped");
                self.schedule_reconnect();
                SendOutcome::NotConnected
            }
        }
    }

    /// Register a prediction listener.
    pub fn on_prediction(&self) -> PredictionListener {
        PredictionListener {
            domain: self.inner.domain,
            receiver: self.inner.predictions.subscribe(),
        }
    }

    /// Unregister a listener. Dropping it has the same effect.
    pub fn off_prediction(&self, listener: PredictionListener) {
        debug!(domain = %listener.domain, "Prediction listener removed");
        drop(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.predictions.receiver_count()
    }

    fn install(&self, connection: Connection) {
        let Connection {
            outbound,
            inbound,
            shutdown,
        } = connection;
        let id = self.inner.next_link_id.fetch_add(1, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(self.clone(), id, inbound, shutdown.clone()));
        let previous = self.with_link(|link| {
            link.replace(Link {
                id,
                outbound,
                shutdown,
                reader,
            })
        });
        if let Some(old) = previous {
            old.shutdown.cancel();
        }
    }

    fn schedule_reconnect(&self) {
        if self.inner.closed.load(Ordering::SeqCst)
            || !self.inner.ever_connected.load(Ordering::SeqCst)
        {
            return;
        }
        if self.inner.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.reconnect_pending.store(false, Ordering::SeqCst);
            return;
        };
        let channel = self.clone();
        handle.spawn(async move {
            info!(domain = %channel.inner.domain, "Reconnecting in background");
            channel.reconnect().await;
            channel.inner.reconnect_pending.store(false, Ordering::SeqCst);
        });
    }

    /// Forget link `id` if it is still current.
    fn connection_lost(&self, id: u64) {
        if let Some(link) = self.take_link(Some(id)) {
            link.shutdown.cancel();
            warn!(domain = %self.inner.domain, "Recognition channel lost its connection");
            self.set_status(ChannelStatus::Disconnected);
        }
    }

    fn take_link(&self, only: Option<u64>) -> Option<Link> {
        self.with_link(|link| match (only, link.as_ref()) {
            (Some(id), Some(current)) if current.id != id => None,
            _ => link.take(),
        })
    }

    fn with_link<R>(&self, f: impl FnOnce(&mut Option<Link>) -> R) -> R {
        let mut guard = match self.inner.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn set_status(&self, status: ChannelStatus) {
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!(
                    domain = %self.inner.domain,
                    from = %current,
                    to = %status,
                    "Channel status"
                );
                *current = status;
                true
            }
        });
    }

    fn deliver(&self, line: &str) {
        match wire::decode_line(line) {
            Ok(Inbound::Prediction(event)) => {
                debug!(
                    domain = %self.inner.domain,
                    label = %event.label,
                    confidence = event.confidence,
                    "Prediction received"
                );
                // no listeners is fine
                let _ = self.inner.predictions.send(event);
            }
            Ok(Inbound::Failed(reason)) => {
                debug!(
                    domain = %self.inner.domain,
                    reason = %reason,
                    "Backend reported failed prediction"
                );
            }
            Ok(Inbound::Other(event)) => {
                debug!(domain = %self.inner.domain, event = %event, "Ignoring backend event");
            }
            Err(e) => {
                warn!(domain = %self.inner.domain, error = %e, "Malformed backend message");
            }
        }
    }
}

async fn read_loop(
    channel: RecognitionChannel,
    id: u64,
    mut inbound: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            line = inbound.recv() => match line {
                Some(line) => channel.deliver(&line),
                None => break,
            }
        }
    }
    channel.connection_lost(id);
}

/// A registered prediction receiver. Dropping it unregisters.
#[derive(Debug)]
pub struct PredictionListener {
    domain: Domain,
    receiver: broadcast::Receiver<PredictionEvent>,
}

impl PredictionListener {
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Next prediction. Skips over any this listener fell behind on.
    pub async fn recv(&mut self) -> Option<PredictionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(domain = %self.domain, skipped, "Prediction listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<PredictionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
