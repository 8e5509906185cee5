//! Antenna Switch Daemon
//!
//! Follows the band the logging software reports and keeps the matching
//! antenna selected on the relay switch. Also serves a TS-590SG emulator so
//! programs that poll a radio can read the same state.

mod settings;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use ant_sim::{Ts590Server, VirtualRelayBoard};
use ant_switch::{
    run_antenna_switch, AntennaSwitch, BroadcastListener, RelaySelector, SwitchCommand,
    SwitchEvent, UdpRelayTransport,
};
use settings::Settings;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on waiting for the relays to go off at exit
const ALL_OFF_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "antswitch=info,ant_protocol=info,ant_switch=info,ant_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting antswitch");

    let settings = load_settings();
    let cancel = CancellationToken::new();

    // Relay controller, real or simulated
    let board = if settings.relay.simulate {
        let board = VirtualRelayBoard::start(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .context("failed to start virtual relay board")?;
        Some(board)
    } else {
        None
    };
    let relay_addr = match &board {
        Some(board) => board.local_addr(),
        None => resolve(&settings.relay.host, settings.relay.port).await?,
    };
    info!("Relay controller at {}", relay_addr);

    let transport =
        UdpRelayTransport::with_policy(relay_addr, settings.retry_policy(), cancel.child_token());
    let selector = Arc::new(RelaySelector::with_config(
        transport,
        settings.selector_config(),
    ));
    let switch = Arc::new(AntennaSwitch::new(selector, settings.port_configs()));

    let mut listener = BroadcastListener::new();
    listener
        .start(&settings.broadcast_host, settings.broadcast_port)
        .await
        .context("failed to start broadcast listener")?;

    let mut emulator = Ts590Server::new(listener.state());
    if settings.emulator_enabled {
        emulator
            .start_on_port(settings.emulator_port)
            .await
            .context("failed to start TS-590SG emulator")?;
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let actor = tokio::spawn(run_antenna_switch(
        switch.clone(),
        listener.subscribe(),
        cmd_rx,
        cancel.clone(),
    ));
    let event_log = tokio::spawn(log_events(switch.subscribe(), cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    if settings.all_off_on_exit {
        all_off(&cmd_tx).await;
    }

    listener.stop().await;
    emulator.stop().await;
    cancel.cancel();
    drop(cmd_tx);
    if let Err(e) = actor.await {
        error!("Antenna switch task failed: {}", e);
    }
    let _ = event_log.await;
    if let Some(board) = board {
        board.stop().await;
    }

    info!("antswitch stopped");
    Ok(())
}

/// Load settings, writing the defaults out on first run
fn load_settings() -> Settings {
    let Some(path) = Settings::settings_path() else {
        warn!("Could not determine settings path, using defaults");
        return Settings::default();
    };

    if path.exists() {
        info!("Loading settings from {}", path.display());
        return Settings::load_from(&path);
    }

    let settings = Settings::default();
    match settings.save_to(&path) {
        Ok(()) => info!("Wrote default settings to {}", path.display()),
        Err(e) => warn!("Could not write default settings: {:#}", e),
    }
    settings
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve relay controller {}", host))?;
    match addrs.next() {
        Some(addr) => Ok(addr),
        None => bail!("relay controller {} has no address", host),
    }
}

async fn all_off(cmd_tx: &mpsc::Sender<SwitchCommand>) {
    let (response, reply) = oneshot::channel();
    if cmd_tx.send(SwitchCommand::TurnOffAll { response }).await.is_err() {
        return;
    }
    match tokio::time::timeout(ALL_OFF_TIMEOUT, reply).await {
        Ok(Ok(Ok(()))) => info!("Relays off"),
        Ok(Ok(Err(e))) => warn!("Could not turn relays off: {}", e),
        Ok(Err(_)) => warn!("Antenna switch stopped before turning relays off"),
        Err(_) => warn!("Timed out turning relays off"),
    }
}

async fn log_events(mut events: broadcast::Receiver<SwitchEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(SwitchEvent::RelaySelected { from, to, band }) => match from {
                Some(from) => info!("Antenna {} -> {} ({})", from, to, band),
                None => info!("Antenna {} ({})", to, band),
            },
            Ok(SwitchEvent::RelayChanged { relay, on }) => {
                info!("Relay {} {}", relay, if on { "on" } else { "off" })
            }
            Ok(SwitchEvent::AllRelaysOff) => info!("All antennas off"),
            Ok(SwitchEvent::BandChanged { from, to }) => info!("Band {} -> {}", from, to),
            Ok(SwitchEvent::Error { source, message }) => {
                error!("{} failed: {}", source, message)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event log skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
