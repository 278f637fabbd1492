//! Duplex channel to a per-domain classifier backend.
//!
//! Sends are fire-and-forget and predictions arrive on their own schedule.
//! There is no request/response correlation, so a single send may produce
//! zero, one or several predictions, in any order.

pub mod client;
pub mod transport;
pub mod wire;

pub use client::{ChannelStatus, PredictionListener, RecognitionChannel, SendOutcome};
pub use transport::{Connection, Connector, MemoryConnector, MemoryPeer, MemoryServer, TcpConnector};
pub use wire::{PredictRequest, PredictionEvent};

/// Errors from establishing or speaking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    Timeout(String),

    #[error("connection refused by {0}")]
    Refused(String),

    #[error("malformed message: {0}")]
    Wire(#[from] serde_json::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
