//! Band-following antenna switch
//!
//! [`AntennaSwitch`] turns radio state updates into relay selections: it
//! decodes the band, picks an antenna configured for it (preferring the
//! one last used on that band), and asks the [`RelaySelector`] to switch.
//!
//! [`run_antenna_switch`] drives a switch from the broadcast listener's
//! event stream and a command channel, the way the rest of the system
//! talks to it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use ant_protocol::{Band, RadioState};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AntennaPortConfig, PortConfigs};
use crate::error::SwitchError;
use crate::events::SwitchEvent;
use crate::selector::RelaySelector;
use crate::transport::RelayLink;

/// Result of handling one radio update or manual choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Frequency is outside every band; relays untouched
    NoBand,
    /// No antenna is configured for the band
    NoAntenna { band: Band },
    /// The right relay was already on
    Unchanged { band: Band, relay: u8 },
    /// Relays were switched
    Switched { band: Band, relay: u8 },
}

/// Coordinates the radio's band with the relay selector
pub struct AntennaSwitch<L> {
    selector: Arc<RelaySelector<L>>,
    configs: watch::Sender<PortConfigs>,
    band: AtomicU8,
}

impl<L: RelayLink> AntennaSwitch<L> {
    pub fn new(selector: Arc<RelaySelector<L>>, configs: PortConfigs) -> Self {
        let (configs, _) = watch::channel(configs);
        Self {
            selector,
            configs,
            band: AtomicU8::new(Band::Unknown.number()),
        }
    }

    pub fn selector(&self) -> &Arc<RelaySelector<L>> {
        &self.selector
    }

    /// Subscribe to relay and band events
    pub fn subscribe(&self) -> broadcast::Receiver<SwitchEvent> {
        self.selector.subscribe()
    }

    /// Current configuration snapshot
    pub fn port_configs(&self) -> PortConfigs {
        self.configs.borrow().clone()
    }

    /// Watch for configuration replacements
    pub fn watch_port_configs(&self) -> watch::Receiver<PortConfigs> {
        self.configs.subscribe()
    }

    /// Replace the port configuration
    ///
    /// The selector's band cache notices the new snapshot version on its
    /// next lookup.
    pub fn set_port_configs(&self, configs: PortConfigs) {
        info!(
            "Port configuration replaced ({} ports, v{})",
            configs.ports().len(),
            configs.version()
        );
        self.configs.send_replace(configs);
    }

    /// Band of the last radio update
    pub fn current_band(&self) -> Band {
        Band::from_number(self.band.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Antennas usable on `band`, in configuration order
    pub fn antennas_for_band(&self, band: Band) -> Vec<AntennaPortConfig> {
        let configs = self.port_configs();
        self.selector
            .relays_for_band(band, &configs)
            .into_iter()
            .filter_map(|relay| configs.port(relay).cloned())
            .collect()
    }

    /// Antennas usable on the current band
    pub fn available_antennas(&self) -> Vec<AntennaPortConfig> {
        self.antennas_for_band(self.current_band())
    }

    /// Follow one radio state update
    pub async fn on_radio_state(&self, state: &RadioState) -> Result<Selection, SwitchError> {
        let band = state.band();
        let previous = Band::from_number(self.band.swap(band.number(), Ordering::AcqRel))
            .unwrap_or_default();
        if previous != band {
            info!("Band changed {} -> {}", previous, band);
            self.selector.publish(SwitchEvent::BandChanged {
                from: previous,
                to: band,
            });
        }

        if band == Band::Unknown {
            return Ok(Selection::NoBand);
        }

        let configs = self.port_configs();
        let eligible = self.selector.relays_for_band(band, &configs);
        let relay = match self.selector.last_selected_relay_for_band(band) {
            Some(last) if eligible.contains(&last) => last,
            _ => match eligible.first() {
                Some(first) => *first,
                None => {
                    debug!("No antenna configured for {}", band);
                    return Ok(Selection::NoAntenna { band });
                }
            },
        };

        if self.selector.is_correct_relay_set(band)
            && self.selector.currently_selected() == Some(relay)
        {
            return Ok(Selection::Unchanged { band, relay });
        }

        self.switch_to(band, relay).await
    }

    /// Manually pick one of the current band's antennas
    pub async fn select_antenna(&self, relay: u8) -> Result<Selection, SwitchError> {
        let band = self.current_band();
        let configs = self.port_configs();
        if !self.selector.relays_for_band(band, &configs).contains(&relay) {
            return Err(SwitchError::NotEligible { relay, band });
        }
        self.switch_to(band, relay).await
    }

    async fn switch_to(&self, band: Band, relay: u8) -> Result<Selection, SwitchError> {
        if self.selector.set_relay_for_antenna(relay, band).await? {
            Ok(Selection::Switched { band, relay })
        } else {
            Ok(Selection::Unchanged { band, relay })
        }
    }
}

/// Commands accepted by [`run_antenna_switch`]
#[derive(Debug)]
pub enum SwitchCommand {
    /// Pick one of the current band's antennas
    SelectAntenna {
        relay: u8,
        response: oneshot::Sender<Result<Selection, SwitchError>>,
    },
    /// Turn every relay off
    TurnOffAll {
        response: oneshot::Sender<Result<(), SwitchError>>,
    },
    /// Replace the port configuration
    SetPortConfigs(PortConfigs),
}

/// Drive `switch` from radio updates and commands until cancelled
///
/// Updates that pile up while a switch is in progress are coalesced to
/// the newest one. A failed update is logged and the loop carries on.
pub async fn run_antenna_switch<L: RelayLink>(
    switch: Arc<AntennaSwitch<L>>,
    mut radio_rx: broadcast::Receiver<RadioState>,
    mut cmd_rx: mpsc::Receiver<SwitchCommand>,
    cancel: CancellationToken,
) {
    info!("Antenna switch actor started");
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv(), if commands_open => match cmd {
                Some(SwitchCommand::SelectAntenna { relay, response }) => {
                    let _ = response.send(switch.select_antenna(relay).await);
                }
                Some(SwitchCommand::TurnOffAll { response }) => {
                    let _ = response.send(switch.selector().turn_off_all().await);
                }
                Some(SwitchCommand::SetPortConfigs(configs)) => {
                    switch.set_port_configs(configs);
                }
                None => {
                    debug!("Switch command channel closed");
                    commands_open = false;
                }
            },

            received = radio_rx.recv() => {
                let mut state = match received {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Antenna switch skipped {} radio updates", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Radio state stream closed");
                        break;
                    }
                };

                loop {
                    match radio_rx.try_recv() {
                        Ok(newer) => state = newer,
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }

                match switch.on_radio_state(&state).await {
                    Ok(selection) => debug!("Radio update handled: {:?}", selection),
                    Err(e) => warn!("Antenna selection failed: {}", e),
                }
            }
        }
    }

    info!("Antenna switch actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::selector::SelectorConfig;
    use ant_protocol::BandSet;
    use ant_sim::RelayBoard;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct BoardLink {
        board: Mutex<RelayBoard>,
        sent: Mutex<usize>,
    }

    #[async_trait]
    impl RelayLink for BoardLink {
        async fn send_and_receive(
            &self,
            message: &str,
            _timeout: Duration,
        ) -> Result<String, TransportError> {
            *self.sent.lock().unwrap() += 1;
            Ok(self.board.lock().unwrap().handle(message).unwrap_or_default())
        }
    }

    fn configs() -> PortConfigs {
        PortConfigs::new(vec![
            AntennaPortConfig::new(1, BandSet::empty().with(Band::M40).with(Band::M20))
                .with_name("Dipole"),
            AntennaPortConfig::new(2, BandSet::empty().with(Band::M20)).with_name("Yagi"),
            AntennaPortConfig::new(3, BandSet::empty().with(Band::M160)),
        ])
    }

    fn switch() -> AntennaSwitch<BoardLink> {
        let selector = RelaySelector::with_config(
            BoardLink::default(),
            SelectorConfig {
                cooldown: Duration::ZERO,
            },
        );
        AntennaSwitch::new(Arc::new(selector), configs())
    }

    fn on(hz: u64) -> RadioState {
        RadioState {
            rx_frequency_hz: Some(hz),
            tx_frequency_hz: Some(hz),
            ..Default::default()
        }
    }

    fn sent(switch: &AntennaSwitch<BoardLink>) -> usize {
        *switch.selector().link().sent.lock().unwrap()
    }

    #[tokio::test]
    async fn test_first_eligible_antenna_selected() {
        let switch = switch();
        assert_eq!(
            switch.on_radio_state(&on(14_074_000)).await.unwrap(),
            Selection::Switched {
                band: Band::M20,
                relay: 1
            }
        );
        assert_eq!(switch.current_band(), Band::M20);
        let names: Vec<_> = switch
            .available_antennas()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Dipole", "Yagi"]);
    }

    #[tokio::test]
    async fn test_repeated_updates_issue_no_commands() {
        let switch = switch();
        switch.on_radio_state(&on(14_074_000)).await.unwrap();
        let issued = sent(&switch);

        assert_eq!(
            switch.on_radio_state(&on(14_075_000)).await.unwrap(),
            Selection::Unchanged {
                band: Band::M20,
                relay: 1
            }
        );
        assert_eq!(sent(&switch), issued);
    }

    #[tokio::test]
    async fn test_band_remembers_manual_choice() {
        let switch = switch();
        switch.on_radio_state(&on(14_074_000)).await.unwrap();
        switch.select_antenna(2).await.unwrap();

        switch.on_radio_state(&on(1_840_000)).await.unwrap();
        assert_eq!(switch.selector().currently_selected(), Some(3));

        assert_eq!(
            switch.on_radio_state(&on(14_200_000)).await.unwrap(),
            Selection::Switched {
                band: Band::M20,
                relay: 2
            }
        );
    }

    #[tokio::test]
    async fn test_out_of_band_and_unconfigured() {
        let switch = switch();
        assert_eq!(
            switch.on_radio_state(&on(5_000_000)).await.unwrap(),
            Selection::NoBand
        );
        assert_eq!(
            switch.on_radio_state(&on(50_100_000)).await.unwrap(),
            Selection::NoAntenna { band: Band::M6 }
        );
        assert_eq!(sent(&switch), 0);
        assert!(matches!(
            switch.select_antenna(1).await,
            Err(SwitchError::NotEligible { relay: 1, band: Band::M6 })
        ));
    }

    #[tokio::test]
    async fn test_config_replacement_takes_effect() {
        let switch = switch();
        switch.on_radio_state(&on(7_100_000)).await.unwrap();
        assert_eq!(switch.selector().currently_selected(), Some(1));

        switch.set_port_configs(PortConfigs::new(vec![AntennaPortConfig::new(
            4,
            BandSet::empty().with(Band::M40),
        )]));
        assert_eq!(
            switch.on_radio_state(&on(7_100_000)).await.unwrap(),
            Selection::Switched {
                band: Band::M40,
                relay: 4
            }
        );
    }

    #[tokio::test]
    async fn test_band_change_event() {
        let switch = switch();
        let mut events = switch.subscribe();
        switch.on_radio_state(&on(7_100_000)).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SwitchEvent::BandChanged {
                from: Band::Unknown,
                to: Band::M40
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            SwitchEvent::RelaySelected { to: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_actor_follows_updates_and_commands() {
        let switch = Arc::new(switch());
        let (radio_tx, radio_rx) = broadcast::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut events = switch.subscribe();

        let actor = tokio::spawn(run_antenna_switch(
            switch.clone(),
            radio_rx,
            cmd_rx,
            cancel.clone(),
        ));

        radio_tx.send(on(14_074_000)).unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, SwitchEvent::RelaySelected { to: 1, .. }) {
                break;
            }
        }

        let (response, reply) = oneshot::channel();
        cmd_tx
            .send(SwitchCommand::SelectAntenna { relay: 2, response })
            .await
            .unwrap();
        assert_eq!(
            reply.await.unwrap().unwrap(),
            Selection::Switched {
                band: Band::M20,
                relay: 2
            }
        );

        let (response, reply) = oneshot::channel();
        cmd_tx
            .send(SwitchCommand::TurnOffAll { response })
            .await
            .unwrap();
        reply.await.unwrap().unwrap();
        assert_eq!(switch.selector().currently_selected(), None);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), actor)
            .await
            .unwrap()
            .unwrap();
    }
}
