//! Antenna port configuration
//!
//! Port configurations are owned by whoever loads them (the daemon's
//! settings file). The engine only sees immutable, versioned snapshots;
//! replacing the configuration means building a new snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ant_protocol::{Band, BandSet, RELAY_COUNT};
use serde::{Deserialize, Serialize};

/// Default number of antenna ports
pub const DEFAULT_PORT_COUNT: u8 = 6;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// One antenna port on the relay switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaPortConfig {
    /// Relay id driving this port (1..=16)
    pub port: u8,
    /// Bands the antenna on this port is usable on
    #[serde(default)]
    pub bands: BandSet,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
}

impl AntennaPortConfig {
    pub fn new(port: u8, bands: BandSet) -> Self {
        Self {
            port,
            bands,
            name: format!("Antenna {}", port),
            description: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether this port serves `band`
    pub fn serves(&self, band: Band) -> bool {
        self.bands.contains(band)
    }
}

/// Immutable snapshot of all port configurations
///
/// Every snapshot gets a process-unique version so caches derived from it
/// can tell when they are stale. Clones share the version.
#[derive(Debug, Clone)]
pub struct PortConfigs {
    ports: Arc<[AntennaPortConfig]>,
    version: u64,
}

impl PortConfigs {
    pub fn new(ports: Vec<AntennaPortConfig>) -> Self {
        Self {
            ports: ports.into(),
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// `count` ports numbered from 1 with no bands assigned
    pub fn unassigned(count: u8) -> Self {
        Self::new(
            (1..=count)
                .map(|port| AntennaPortConfig::new(port, BandSet::empty()))
                .collect(),
        )
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ports(&self) -> &[AntennaPortConfig] {
        &self.ports
    }

    pub fn port(&self, port: u8) -> Option<&AntennaPortConfig> {
        self.ports.iter().find(|p| p.port == port)
    }

    /// Port ids serving `band`, in configuration order
    ///
    /// Ports outside the relay range and repeated ids are skipped.
    pub fn eligible_relays(&self, band: Band) -> Vec<u8> {
        let mut relays = Vec::new();
        for config in self.ports.iter().filter(|p| p.serves(band)) {
            if !(1..=RELAY_COUNT).contains(&config.port) {
                tracing::warn!("Ignoring antenna port {} outside relay range", config.port);
                continue;
            }
            if !relays.contains(&config.port) {
                relays.push(config.port);
            }
        }
        relays
    }
}

impl Default for PortConfigs {
    fn default() -> Self {
        Self::unassigned(DEFAULT_PORT_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_relays_in_order() {
        let configs = PortConfigs::new(vec![
            AntennaPortConfig::new(1, BandSet::empty().with(Band::M160)),
            AntennaPortConfig::new(2, BandSet::empty().with(Band::M80)),
            AntennaPortConfig::new(3, BandSet::empty().with(Band::M160)),
        ]);
        assert_eq!(configs.eligible_relays(Band::M160), vec![1, 3]);
        assert_eq!(configs.eligible_relays(Band::M80), vec![2]);
        assert!(configs.eligible_relays(Band::M6).is_empty());
        assert!(configs.eligible_relays(Band::Unknown).is_empty());
    }

    #[test]
    fn test_invalid_and_duplicate_ports_skipped() {
        let configs = PortConfigs::new(vec![
            AntennaPortConfig::new(0, BandSet::all()),
            AntennaPortConfig::new(4, BandSet::all()),
            AntennaPortConfig::new(4, BandSet::all()),
            AntennaPortConfig::new(17, BandSet::all()),
        ]);
        assert_eq!(configs.eligible_relays(Band::M20), vec![4]);
    }

    #[test]
    fn test_versions_are_unique() {
        let a = PortConfigs::default();
        let b = PortConfigs::default();
        assert_ne!(a.version(), b.version());
        assert_eq!(a.clone().version(), a.version());
        assert_eq!(a.ports().len(), 6);
        assert_eq!(a.port(6).map(|p| p.name.as_str()), Some("Antenna 6"));
    }
}
