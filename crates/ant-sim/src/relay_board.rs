//! Simulated relay controller
//!
//! [`RelayBoard`] is the controller's command handling as a plain state
//! machine. [`VirtualRelayBoard`] serves it over UDP so the real transport
//! can be exercised end to end, optionally dropping datagrams to force
//! retries.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ant_protocol::relay::validate_relay;
use ant_protocol::RelayMask;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SimError;

/// Grace period for the receive loop to exit on stop
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Most recent datagrams kept in the command log
pub const RECEIVED_LOG_LEN: usize = 256;

/// In-memory relay controller
#[derive(Debug, Clone, Default)]
pub struct RelayBoard {
    mask: RelayMask,
}

impl RelayBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(mask: RelayMask) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> RelayMask {
        self.mask
    }

    pub fn set_mask(&mut self, mask: RelayMask) {
        self.mask = mask;
    }

    /// Apply one request and return the reply, `None` for garbage
    pub fn handle(&mut self, request: &str) -> Option<String> {
        let request = request.trim();
        let fields: Vec<&str> = request.split(',').collect();

        match fields.as_slice() {
            ["RELAY-STATE-255"] => {
                let bits = self.mask.bits();
                Some(format!("RELAY-STATE-255,{},{},OK", bits >> 8, bits & 0xFF))
            }
            ["RELAY-AOF-255", "1", "1"] | ["RELAY-SET_ALL-255", "0", "0"] => {
                self.mask = RelayMask::NONE;
                Some(format!("{},OK", request))
            }
            ["RELAY-SET-255", relay, state] => {
                let relay = validate_relay(relay.parse().ok()?).ok()?;
                let on = match *state {
                    "0" => false,
                    "1" => true,
                    _ => return None,
                };
                self.mask = self.mask.with(relay, on);
                Some(format!("{},OK", request))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    board: RelayBoard,
    drop_remaining: usize,
    received: VecDeque<String>,
}

impl Shared {
    fn record(&mut self, request: &str) {
        if self.received.len() == RECEIVED_LOG_LEN {
            self.received.pop_front();
        }
        self.received.push_back(request.to_string());
    }
}

/// UDP relay controller for tests and simulation mode
pub struct VirtualRelayBoard {
    shared: Arc<Mutex<Shared>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl VirtualRelayBoard {
    /// Bind `addr` and start answering with every relay off
    pub async fn start(addr: SocketAddr) -> Result<Self, SimError> {
        Self::start_with_mask(addr, RelayMask::NONE).await
    }

    /// Bind `addr` and start answering from an initial relay state
    pub async fn start_with_mask(addr: SocketAddr, mask: RelayMask) -> Result<Self, SimError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SimError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| SimError::Bind { addr, source })?;

        let shared = Arc::new(Mutex::new(Shared {
            board: RelayBoard::with_mask(mask),
            ..Default::default()
        }));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_board(socket, shared.clone(), cancel.clone()));

        info!("Virtual relay board listening on {}", local_addr);
        Ok(Self {
            shared,
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current relay state
    pub fn mask(&self) -> RelayMask {
        self.lock().board.mask()
    }

    pub fn set_mask(&self, mask: RelayMask) {
        self.lock().board.set_mask(mask);
    }

    /// Silently drop the next `count` datagrams
    pub fn drop_next(&self, count: usize) {
        self.lock().drop_remaining = count;
    }

    /// Datagrams received so far, oldest first, dropped ones included
    ///
    /// Only the last [`RECEIVED_LOG_LEN`] are kept.
    pub fn received(&self) -> Vec<String> {
        self.lock().received.iter().cloned().collect()
    }

    pub fn clear_received(&self) {
        self.lock().received.clear();
    }

    /// Stop answering and wait for the receive loop to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("Virtual relay board did not stop within {:?}", STOP_GRACE);
            }
        }
        info!("Virtual relay board on {} stopped", self.local_addr);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for VirtualRelayBoard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_board(socket: UdpSocket, shared: Arc<Mutex<Shared>>, cancel: CancellationToken) {
    let mut buf = [0u8; 512];

    loop {
        let (n, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    // ICMP unreachable from a closed client socket shows up here
                    debug!("Virtual relay board receive error: {}", e);
                    continue;
                }
            },
        };

        let request = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        let reply = {
            let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.record(&request);
            if shared.drop_remaining > 0 {
                shared.drop_remaining -= 1;
                debug!("Virtual relay board dropping {:?}", request);
                continue;
            }
            shared.board.handle(&request)
        };

        match reply {
            Some(reply) => {
                debug!("Virtual relay board {} -> {}", request, reply);
                if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                    warn!("Virtual relay board failed to reply to {}: {}", peer, e);
                }
            }
            None => debug!("Virtual relay board ignoring {:?}", request),
        }
    }
}
