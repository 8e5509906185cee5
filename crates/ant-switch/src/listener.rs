//! UDP listener for logger radio-info broadcasts
//!
//! Binds the broadcast port, parses each datagram into a [`RadioState`] and
//! publishes it two ways: as an event on a broadcast channel, and as the
//! latest snapshot on a watch channel (last writer wins).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use ant_protocol::broadcast::parse_radio_info;
use ant_protocol::RadioState;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ListenerError;

/// UDP port loggers broadcast radio info on by default
pub const DEFAULT_BROADCAST_PORT: u16 = 12060;

/// Grace period for the receive loop to exit on stop
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Pause after a socket error before receiving again
const RECEIVE_ERROR_DELAY: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 64;

/// Largest datagram we accept
const MAX_DATAGRAM_LEN: usize = 8192;

/// Receives radio state broadcasts from the logging software
pub struct BroadcastListener {
    radio_tx: broadcast::Sender<RadioState>,
    state_tx: watch::Sender<RadioState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl BroadcastListener {
    pub fn new() -> Self {
        let (radio_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(RadioState::default());
        Self {
            radio_tx,
            state_tx,
            cancel: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Bind `host:port` and start receiving on a background task
    ///
    /// `host` may be a literal address or a name to resolve. Returns the
    /// bound address.
    pub async fn start(&mut self, host: &str, port: u16) -> Result<SocketAddr, ListenerError> {
        if self.task.is_some() {
            return Err(ListenerError::AlreadyRunning);
        }

        let addr = resolve(host, port).await?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| ListenerError::from_bind(addr, e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| ListenerError::from_bind(addr, e))?;

        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(receive_loop(
            socket,
            self.radio_tx.clone(),
            self.state_tx.clone(),
            self.cancel.clone(),
        )));
        self.local_addr = Some(local_addr);

        info!("Listening for radio broadcasts on {}", local_addr);
        Ok(local_addr)
    }

    /// Cancel the receive loop and release the socket
    ///
    /// Waits up to five seconds for the loop to exit, then proceeds anyway.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                warn!("Broadcast listener did not stop within {:?}", STOP_GRACE);
                task.abort();
            }
        }
        if let Some(addr) = self.local_addr.take() {
            info!("Broadcast listener on {} stopped", addr);
        }
    }

    /// Subscribe to every parsed radio state
    pub fn subscribe(&self) -> broadcast::Receiver<RadioState> {
        self.radio_tx.subscribe()
    }

    /// Watch the latest radio state
    pub fn state(&self) -> watch::Receiver<RadioState> {
        self.state_tx.subscribe()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Default for BroadcastListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BroadcastListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ListenerError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    // Broadcasts are IPv4, so prefer an IPv4 result
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ListenerError::NoAddress(host.to_string()))
}

async fn receive_loop(
    socket: UdpSocket,
    radio_tx: broadcast::Sender<RadioState>,
    state_tx: watch::Sender<RadioState>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => result,
        };

        match received {
            Ok((n, peer)) => {
                let payload = String::from_utf8_lossy(&buf[..n]);
                match parse_radio_info(&payload) {
                    Ok(state) => {
                        debug!(
                            "Radio info from {}: rx={:?} tx={:?} mode={} split={} tx_on={}",
                            peer,
                            state.rx_frequency_hz,
                            state.tx_frequency_hz,
                            state.mode,
                            state.split,
                            state.transmitting
                        );
                        state_tx.send_replace(state.clone());
                        // No subscribers is fine
                        let _ = radio_tx.send(state);
                    }
                    Err(e) => warn!("Dropping broadcast from {}: {}", peer, e),
                }
            }
            Err(e) => {
                warn!("Broadcast receive error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_DELAY) => {}
                }
            }
        }
    }

    debug!("Broadcast receive loop ended");
}
