//! Relay selection state machine
//!
//! The selector owns the on/off state of the relay controller and keeps at
//! most one relay on. It is either idle (nothing on) or has exactly one
//! relay selected.
//!
//! # Concurrency
//!
//! Every operation that can change relay state runs while holding a single
//! async mutex (the gate), so concurrent callers are totally ordered and a
//! switching sequence is never interleaved with another. The gate is a
//! guard value, so it is released on every exit path including errors.
//!
//! Status reads (`relay_state`, `currently_selected`, ...) are lock-free
//! atomic snapshots. They are updated only after the controller confirms a
//! change, and may lag a sequence that is still in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use ant_protocol::relay::{parse_state_reply, validate_relay};
use ant_protocol::{Band, RelayCommand, RelayMask, RELAY_COUNT};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::PortConfigs;
use crate::error::SwitchError;
use crate::events::SwitchEvent;
use crate::transport::RelayLink;

/// Minimum spacing between band-driven relay changes
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(100);

const EVENT_CAPACITY: usize = 64;

/// One slot per band number, 0..=10
const BAND_SLOTS: usize = 11;

/// Selector tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Band changes closer together than this are delayed, not dropped
    pub cooldown: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// State only touched while holding the gate
#[derive(Debug, Default)]
struct Bank {
    /// Last hardware state confirmed by the controller, `None` until read
    mask: Option<RelayMask>,
    /// When the last band-driven change completed
    last_band_change: Option<Instant>,
}

#[derive(Debug, Default)]
struct BandCache {
    version: u64,
    relays: HashMap<Band, Vec<u8>>,
}

/// Relay manager for one relay controller
pub struct RelaySelector<L> {
    link: L,
    config: SelectorConfig,
    bank: Mutex<Bank>,
    mask: AtomicU16,
    selected: AtomicU8,
    last_selected: [AtomicU8; BAND_SLOTS],
    band_cache: StdMutex<BandCache>,
    events: broadcast::Sender<SwitchEvent>,
}

impl<L: RelayLink> RelaySelector<L> {
    /// Create a selector with the default cooldown
    pub fn new(link: L) -> Self {
        Self::with_config(link, SelectorConfig::default())
    }

    pub fn with_config(link: L, config: SelectorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            link,
            config,
            bank: Mutex::new(Bank::default()),
            mask: AtomicU16::new(0),
            selected: AtomicU8::new(0),
            last_selected: std::array::from_fn(|_| AtomicU8::new(0)),
            band_cache: StdMutex::new(BandCache::default()),
            events,
        }
    }

    /// The underlying relay link
    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> SelectorConfig {
        self.config
    }

    /// Subscribe to relay events
    pub fn subscribe(&self) -> broadcast::Receiver<SwitchEvent> {
        self.events.subscribe()
    }

    /// Make `relay` the only relay on, on behalf of `band`
    ///
    /// Returns `Ok(false)` without touching the hardware when the relay is
    /// already the sole relay on. Band changes arriving within the cooldown
    /// of the previous one wait out the remainder before switching.
    pub async fn set_relay_for_antenna(&self, relay: u8, band: Band) -> Result<bool, SwitchError> {
        let relay = check_relay(relay)?;
        let mut bank = self.bank.lock().await;

        if bank.mask == Some(RelayMask::only(relay)) {
            debug!("Relay {} already selected", relay);
            self.remember(band, relay);
            return Ok(false);
        }

        if let Some(last) = bank.last_band_change {
            let elapsed = last.elapsed();
            if elapsed < self.config.cooldown {
                let wait = self.config.cooldown - elapsed;
                debug!("Band change cooldown, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        let previous = self.currently_selected();
        self.select_exclusive(&mut bank, relay)
            .await
            .map_err(|e| self.fail("set_relay_for_antenna", e))?;

        bank.last_band_change = Some(Instant::now());
        self.remember(band, relay);

        info!("Selected relay {} for {}", relay, band);
        self.emit(SwitchEvent::RelaySelected {
            from: previous,
            to: relay,
            band,
        });
        Ok(true)
    }

    /// Turn every relay off
    pub async fn turn_off_all(&self) -> Result<(), SwitchError> {
        let mut bank = self.bank.lock().await;

        self.command(RelayCommand::AllOff)
            .await
            .map_err(|e| self.fail("turn_off_all", e))?;
        self.commit(&mut bank, RelayMask::NONE);

        info!("All relays off");
        self.emit(SwitchEvent::AllRelaysOff);
        Ok(())
    }

    /// Turn off every relay except `relay`, and turn `relay` on
    pub async fn turn_off_all_except(&self, relay: u8) -> Result<(), SwitchError> {
        let relay = check_relay(relay)?;
        let mut bank = self.bank.lock().await;

        if bank.mask == Some(RelayMask::only(relay)) {
            return Ok(());
        }

        let previous = self.currently_selected();
        self.select_exclusive(&mut bank, relay)
            .await
            .map_err(|e| self.fail("turn_off_all_except", e))?;

        self.emit(SwitchEvent::RelaySelected {
            from: previous,
            to: relay,
            band: Band::Unknown,
        });
        Ok(())
    }

    /// Switch a single relay
    ///
    /// Turning a relay on turns the others off first, so at most one relay
    /// is ever on. Returns `Ok(false)` when the relay was already in the
    /// requested state.
    pub async fn set_relay(&self, relay: u8, on: bool) -> Result<bool, SwitchError> {
        let relay = check_relay(relay)?;
        let mut bank = self.bank.lock().await;

        if on {
            if bank.mask == Some(RelayMask::only(relay)) {
                return Ok(false);
            }
            let previous = self.currently_selected();
            self.select_exclusive(&mut bank, relay)
                .await
                .map_err(|e| self.fail("set_relay", e))?;
            self.emit(SwitchEvent::RelaySelected {
                from: previous,
                to: relay,
                band: Band::Unknown,
            });
            return Ok(true);
        }

        let mask = self
            .known_mask(&mut bank)
            .await
            .map_err(|e| self.fail("set_relay", e))?;
        if !mask.is_on(relay) {
            return Ok(false);
        }

        self.command(RelayCommand::Set { relay, on: false })
            .await
            .map_err(|e| self.fail("set_relay", e))?;
        self.commit(&mut bank, mask.with(relay, false));

        info!("Relay {} off", relay);
        self.emit(SwitchEvent::RelayChanged { relay, on: false });
        Ok(true)
    }

    /// Relays eligible for `band` under `configs`
    ///
    /// Results are cached per band and dropped whenever a snapshot with a
    /// different version is passed in.
    pub fn relays_for_band(&self, band: Band, configs: &PortConfigs) -> Vec<u8> {
        let mut cache = self
            .band_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if cache.version != configs.version() {
            if !cache.relays.is_empty() {
                debug!(
                    "Port configuration changed (v{} -> v{}), clearing band cache",
                    cache.version,
                    configs.version()
                );
            }
            cache.relays.clear();
            cache.version = configs.version();
        }

        cache
            .relays
            .entry(band)
            .or_insert_with(|| configs.eligible_relays(band))
            .clone()
    }

    /// Relay last selected for `band`, if any
    pub fn last_selected_relay_for_band(&self, band: Band) -> Option<u8> {
        match self.last_selected[usize::from(band.number())].load(Ordering::Acquire) {
            0 => None,
            relay => Some(relay),
        }
    }

    /// Whether the relay on now is the one last chosen for `band`
    pub fn is_correct_relay_set(&self, band: Band) -> bool {
        match self.last_selected_relay_for_band(band) {
            Some(relay) => self.currently_selected() == Some(relay),
            None => false,
        }
    }

    /// The sole relay on, if any
    pub fn currently_selected(&self) -> Option<u8> {
        match self.selected.load(Ordering::Acquire) {
            0 => None,
            relay => Some(relay),
        }
    }

    /// Last confirmed state of one relay (false when out of range)
    pub fn relay_state(&self, relay: u8) -> bool {
        self.relay_mask().is_on(relay)
    }

    /// Last confirmed state of every relay
    pub fn all_relay_states(&self) -> BTreeMap<u8, bool> {
        let mask = self.relay_mask();
        (1..=RELAY_COUNT).map(|relay| (relay, mask.is_on(relay))).collect()
    }

    pub fn relay_mask(&self) -> RelayMask {
        RelayMask::from_bits(self.mask.load(Ordering::Acquire))
    }

    // ---------------------------------------------------------------------
    // Gate-held helpers
    // ---------------------------------------------------------------------

    /// Off every other relay, then on `relay`, then commit
    async fn select_exclusive(&self, bank: &mut Bank, relay: u8) -> Result<(), SwitchError> {
        let mask = self.known_mask(bank).await?;

        for other in mask.on_relays().filter(|r| *r != relay) {
            self.command(RelayCommand::Set {
                relay: other,
                on: false,
            })
            .await?;
        }

        if !mask.is_on(relay) {
            self.command(RelayCommand::Set { relay, on: true }).await?;
        }

        self.commit(bank, RelayMask::only(relay));
        Ok(())
    }

    /// Cached mask, or the controller's answer to a state query
    async fn known_mask(&self, bank: &mut Bank) -> Result<RelayMask, SwitchError> {
        if let Some(mask) = bank.mask {
            return Ok(mask);
        }

        let query = RelayCommand::QueryState;
        let reply = self
            .link
            .send_and_receive(&query.encode(), self.link.reply_timeout())
            .await?;
        let mask = parse_state_reply(&reply)?;
        debug!("Relay controller state: {:016b}", mask.bits());

        self.commit(bank, mask);
        Ok(mask)
    }

    async fn command(&self, command: RelayCommand) -> Result<(), SwitchError> {
        let text = command.encode();
        if self
            .link
            .send_and_validate(&text, &command.expected_reply())
            .await?
        {
            Ok(())
        } else {
            Err(SwitchError::Rejected(text))
        }
    }

    fn commit(&self, bank: &mut Bank, mask: RelayMask) {
        bank.mask = Some(mask);
        self.mask.store(mask.bits(), Ordering::Release);
        self.selected
            .store(mask.sole_on().unwrap_or(0), Ordering::Release);
    }

    fn remember(&self, band: Band, relay: u8) {
        if band != Band::Unknown {
            self.last_selected[usize::from(band.number())].store(relay, Ordering::Release);
        }
    }

    fn emit(&self, event: SwitchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Publish an event from outside the selector on the same bus
    pub(crate) fn publish(&self, event: SwitchEvent) {
        self.emit(event);
    }

    fn fail(&self, operation: &str, error: SwitchError) -> SwitchError {
        warn!("{} failed: {}", operation, error);
        self.emit(SwitchEvent::Error {
            source: operation.to_string(),
            message: error.to_string(),
        });
        error
    }
}

fn check_relay(relay: u8) -> Result<u8, SwitchError> {
    validate_relay(relay).map_err(|_| SwitchError::InvalidRelay(relay))
}
