//! Error types for the simulators

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors from starting a simulated endpoint
#[derive(Debug, Error)]
pub enum SimError {
    /// Could not bind the listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `start` called on a server that is already running
    #[error("server already running on {0}")]
    AlreadyRunning(SocketAddr),
}
