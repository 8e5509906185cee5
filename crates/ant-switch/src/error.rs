//! Error types for the switch engine

use std::io;
use std::net::SocketAddr;

use ant_protocol::{Band, ProtocolError};
use thiserror::Error;

/// Failures of a single relay controller exchange
#[derive(Debug, Error)]
pub enum TransportError {
    /// No reply within the timeout on any attempt
    #[error("no reply from {addr} after {attempts} attempts ({timeout_ms}ms each)")]
    Timeout {
        addr: SocketAddr,
        attempts: u32,
        timeout_ms: u64,
    },

    /// Socket failure on the last attempt
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The transport was shut down while a call was in flight
    #[error("relay transport cancelled")]
    Cancelled,
}

/// Errors surfaced by relay switching operations
#[derive(Debug, Error)]
pub enum SwitchError {
    /// Relay id outside 1..=16, rejected before any command is sent
    #[error("invalid relay id {0}")]
    InvalidRelay(u8),

    /// Relay is not configured for the current band
    #[error("relay {relay} is not configured for {band}")]
    NotEligible { relay: u8, band: Band },

    /// Controller answered, but not with the expected acknowledgement
    #[error("relay controller rejected {0}")]
    Rejected(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors from starting the broadcast listener
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name lookup failed
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Host name resolved to nothing
    #[error("{0} did not resolve to any address")]
    NoAddress(String),

    /// Another socket already owns the port
    #[error("address {0} is already in use")]
    AddressInUse(SocketAddr),

    /// The address does not belong to this machine
    #[error("address {0} is not available on this host")]
    AddressUnavailable(SocketAddr),

    /// Any other bind failure
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `start` called twice without `stop`
    #[error("listener already running")]
    AlreadyRunning,
}

impl ListenerError {
    /// Classify a bind failure by its OS error kind
    pub(crate) fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => ListenerError::AddressInUse(addr),
            io::ErrorKind::AddrNotAvailable => ListenerError::AddressUnavailable(addr),
            _ => ListenerError::Bind { addr, source },
        }
    }
}
