//! Error types for the DCC and NickServ layers.
//!
//! Per-connection and per-event failures are contained where they happen and
//! only logged. Only startup failures (`Bind`, `Discovery`) abort the DCC
//! subsystem, and even those leave the host process running.

use std::io;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DccError {
    /// Malformed dotted-quad text or an out-of-range packed address.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Inbound connection from an IP with no pending registration.
    #[error("connection from unidentified peer {0}")]
    UnidentifiedPeer(IpAddr),

    #[error("connection with {nick} failed: {source}")]
    PeerIo {
        nick: String,
        #[source]
        source: io::Error,
    },

    #[error("handler {handler} failed on {command}: {reason}")]
    HandlerFailure {
        handler: String,
        command: String,
        reason: String,
    },

    #[error("failed to bind DCC listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to discover public address: {0}")]
    Discovery(String),

    #[error("no DCC connection with {0}")]
    NotConnected(String),

    #[error("DCC subsystem is not listening")]
    Disabled,
}

impl DccError {
    /// Bind and discovery failures are the only ones that disable the subsystem.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::Discovery(_))
    }
}

/// Failures of a blocking status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("no status reply for {0} before timeout")]
    Timeout(String),

    #[error("status lookup cancelled")]
    Cancelled,
}
