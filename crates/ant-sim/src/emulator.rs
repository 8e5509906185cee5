//! TS-590SG CAT emulator over TCP
//!
//! Logging programs that only know how to poll a radio can connect here
//! and read the state the broadcast feed reported. The server never talks
//! to a real radio: every answer is formatted from the latest
//! [`RadioState`] published on a watch channel.
//!
//! Each connection runs its own handler task. A handler reads `;` or
//! line-terminated commands and writes exactly one answer per command until
//! the peer disconnects, an I/O error occurs, or the server stops.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use ant_protocol::kenwood::KenwoodCodec;
use ant_protocol::{ProtocolCodec, RadioState};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SimError;

/// Port the emulator listens on unless configured otherwise
pub const DEFAULT_CAT_PORT: u16 = 4532;

/// Grace period for the accept loop and handlers to exit on stop
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Back off after a failed accept so a persistent error cannot spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fake TS-590SG answering from cached radio state
pub struct Ts590Server {
    state: watch::Receiver<RadioState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Ts590Server {
    pub fn new(state: watch::Receiver<RadioState>) -> Self {
        Self {
            state,
            cancel: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Listen on all interfaces at `port`
    pub async fn start_on_port(&mut self, port: u16) -> Result<SocketAddr, SimError> {
        self.start(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
    }

    /// Bind `addr` and accept connections on a background task
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr, SimError> {
        if let Some(running) = self.local_addr {
            return Err(SimError::AlreadyRunning(running));
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SimError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SimError::Bind { addr, source })?;

        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.state.clone(),
            self.cancel.clone(),
        )));
        self.local_addr = Some(local_addr);

        info!("TS-590SG emulator listening on {}", local_addr);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Close the listener and all client connections
    ///
    /// Waits up to five seconds, then gives up on a clean exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                warn!("TS-590SG emulator did not stop within {:?}", STOP_GRACE);
                task.abort();
            }
        }
        if let Some(addr) = self.local_addr.take() {
            info!("TS-590SG emulator on {} stopped", addr);
        }
    }
}

impl Drop for Ts590Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: watch::Receiver<RadioState>,
    cancel: CancellationToken,
) {
    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("CAT client connected from {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("CAT client {} nodelay failed: {}", peer, e);
                    }
                    let state = state.clone();
                    let cancel = cancel.child_token();
                    clients.spawn(async move {
                        if let Err(e) = serve_client(stream, state, cancel).await {
                            debug!("CAT client {} error: {}", peer, e);
                        }
                        info!("CAT client {} disconnected", peer);
                    });
                }
                Err(e) => {
                    warn!("CAT accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    // Handlers hold child tokens and exit on their own
    while clients.join_next().await.is_some() {}
}

/// Answer CAT queries on one connection
///
/// Returns when the peer closes the stream or `cancel` fires.
pub async fn serve_client<S>(
    mut stream: S,
    state: watch::Receiver<RadioState>,
    cancel: CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = KenwoodCodec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = stream.read(&mut buf) => result?,
        };
        if n == 0 {
            return Ok(());
        }

        codec.push_bytes(&buf[..n]);
        while let Some((cmd, raw)) = codec.next_command_with_bytes() {
            let response = cmd.respond(&state.borrow());
            debug!(
                "CAT {} -> {}",
                String::from_utf8_lossy(&raw).trim(),
                response
            );
            stream.write_all(response.as_bytes()).await?;
        }
        stream.flush().await?;
    }
}
