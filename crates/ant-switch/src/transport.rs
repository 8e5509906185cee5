//! Request/response transport to the relay controller
//!
//! The controller speaks single UDP datagrams with no sequencing, so each
//! exchange is wrapped in a timeout and retried with exponential backoff.
//! All exchanges pass through one gate: the hardware is only ever asked
//! one question at a time.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Default time to wait for a reply datagram
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest reply we expect from the controller
const MAX_REPLY_LEN: usize = 512;

/// Retry schedule for relay exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure
    pub base_backoff: Duration,
    /// Wait for a reply on each attempt
    pub reply_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << retry.min(16))
    }
}

/// Command/response link to a relay controller
#[async_trait]
pub trait RelayLink: Send + Sync {
    /// Send one message and return the first reply, retrying on failure
    async fn send_and_receive(
        &self,
        message: &str,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    /// Reply timeout used when the caller does not pick one
    fn reply_timeout(&self) -> Duration {
        DEFAULT_REPLY_TIMEOUT
    }

    /// Send a command and check that the reply contains `expected`
    ///
    /// A reply that does not match is `Ok(false)`; only transport failures
    /// are errors.
    async fn send_and_validate(
        &self,
        command: &str,
        expected: &str,
    ) -> Result<bool, TransportError> {
        let reply = self.send_and_receive(command, self.reply_timeout()).await?;
        let accepted = reply.contains(expected);
        if !accepted {
            debug!("Reply {:?} does not match {:?}", reply, expected);
        }
        Ok(accepted)
    }
}

/// Outcome of one send/receive attempt
#[derive(Debug)]
pub(crate) enum Attempt {
    Reply(String),
    TimedOut,
    Failed(io::Error),
}

/// Drive `attempt` under `policy` until it yields a reply
///
/// Cancellation aborts immediately, including during backoff sleeps.
pub(crate) async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    addr: SocketAddr,
    timeout: Duration,
    mut attempt: F,
) -> Result<String, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for n in 0..attempts {
        if n > 0 {
            let delay = policy.backoff(n - 1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = attempt(n) => outcome,
        };

        match outcome {
            Attempt::Reply(reply) => return Ok(reply),
            Attempt::TimedOut => {
                warn!("No reply from {} (attempt {}/{})", addr, n + 1, attempts);
                last_error = None;
            }
            Attempt::Failed(e) => {
                warn!("Relay exchange with {} failed (attempt {}/{}): {}", addr, n + 1, attempts, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(source) => TransportError::Io { addr, source },
        None => TransportError::Timeout {
            addr,
            attempts,
            timeout_ms: timeout.as_millis() as u64,
        },
    })
}

/// UDP transport to a relay controller
///
/// Each attempt uses a fresh ephemeral socket connected to the controller,
/// so a late reply to an abandoned attempt can never be read as the answer
/// to the next one.
pub struct UdpRelayTransport {
    remote: SocketAddr,
    policy: RetryPolicy,
    gate: Mutex<()>,
    cancel: CancellationToken,
}

impl UdpRelayTransport {
    /// Create a transport with the default retry policy
    pub fn new(remote: SocketAddr) -> Self {
        Self::with_policy(remote, RetryPolicy::default(), CancellationToken::new())
    }

    /// Create a transport with an explicit policy and cancellation token
    pub fn with_policy(remote: SocketAddr, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            remote,
            policy,
            gate: Mutex::new(()),
            cancel,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Abort in-flight and future exchanges
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn local_bind(&self) -> SocketAddr {
        match self.remote {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }

    async fn attempt_once(&self, message: &str, timeout: Duration) -> Attempt {
        let socket = match UdpSocket::bind(self.local_bind()).await {
            Ok(socket) => socket,
            Err(e) => return Attempt::Failed(e),
        };
        if let Err(e) = socket.connect(self.remote).await {
            return Attempt::Failed(e);
        }

        debug!("Relay TX {}: {}", self.remote, message);
        if let Err(e) = socket.send(message.as_bytes()).await {
            return Attempt::Failed(e);
        }

        let mut buf = [0u8; MAX_REPLY_LEN];
        match time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                debug!("Relay RX {}: {}", self.remote, reply);
                Attempt::Reply(reply)
            }
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::TimedOut,
        }
    }
}

#[async_trait]
impl RelayLink for UdpRelayTransport {
    async fn send_and_receive(
        &self,
        message: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let _guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.gate.lock() => guard,
        };

        run_with_retry(&self.policy, &self.cancel, self.remote, timeout, |_| {
            self.attempt_once(message, timeout)
        })
        .await
    }

    fn reply_timeout(&self) -> Duration {
        self.policy.reply_timeout
    }
}
