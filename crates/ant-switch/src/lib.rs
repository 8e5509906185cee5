//! Antenna Switch Engine
//!
//! This crate provides the logic for switching antennas behind a UDP relay
//! controller, following the band the radio is on.
//!
//! # Architecture
//!
//! Radio state arrives as logger broadcasts and flows through three pieces:
//!
//! - **BroadcastListener**: receives UDP datagrams, parses them into
//!   `RadioState` and publishes both an event stream and the latest snapshot
//! - **AntennaSwitch**: decodes the band and picks the antenna configured
//!   for it, preferring the one last used on that band
//! - **RelaySelector**: serializes every relay change behind one gate and
//!   keeps at most one relay on, talking to the controller through a
//!   [`RelayLink`] with retries
//!
//! All relay and band changes are published as [`SwitchEvent`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ant_switch::{AntennaSwitch, PortConfigs, RelaySelector, UdpRelayTransport};
//!
//! # async fn example() -> Result<(), ant_switch::SwitchError> {
//! let transport = UdpRelayTransport::new("10.0.0.12:12090".parse().unwrap());
//! let selector = Arc::new(RelaySelector::new(transport));
//! let switch = AntennaSwitch::new(selector, PortConfigs::default());
//!
//! // Feed radio states from a BroadcastListener:
//! // switch.on_radio_state(&state).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod listener;
pub mod selector;
pub mod transport;

pub use config::{AntennaPortConfig, PortConfigs, DEFAULT_PORT_COUNT};
pub use engine::{run_antenna_switch, AntennaSwitch, Selection, SwitchCommand};
pub use error::{ListenerError, SwitchError, TransportError};
pub use events::SwitchEvent;
pub use listener::{BroadcastListener, DEFAULT_BROADCAST_PORT};
pub use selector::{RelaySelector, SelectorConfig, DEFAULT_COOLDOWN};
pub use transport::{RelayLink, RetryPolicy, UdpRelayTransport, DEFAULT_REPLY_TIMEOUT};

// Re-export protocol types callers need alongside the engine
pub use ant_protocol::{Band, BandSet, Mode, RadioState};
