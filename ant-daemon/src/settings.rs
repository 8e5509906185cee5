//! Daemon settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ant_sim::DEFAULT_CAT_PORT;
use ant_switch::{
    AntennaPortConfig, PortConfigs, RetryPolicy, SelectorConfig, DEFAULT_BROADCAST_PORT,
    DEFAULT_PORT_COUNT,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Relay controller connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelaySettings {
    /// Controller host name or address
    pub host: String,
    /// Controller UDP port
    pub port: u16,
    /// Attempts per exchange, including the first
    pub max_attempts: u32,
    /// Backoff after the first failed attempt
    pub base_backoff_ms: u64,
    /// Reply wait per attempt
    pub reply_timeout_ms: u64,
    /// Run a virtual relay board on loopback instead of using `host`
    pub simulate: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            host: "10.0.0.12".to_string(),
            port: 12090,
            max_attempts: policy.max_attempts,
            base_backoff_ms: policy.base_backoff.as_millis() as u64,
            reply_timeout_ms: policy.reply_timeout.as_millis() as u64,
            simulate: false,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Address to receive logger broadcasts on
    pub broadcast_host: String,
    /// Logger broadcast UDP port
    pub broadcast_port: u16,
    /// Relay controller
    pub relay: RelaySettings,
    /// Serve the TS-590SG emulator
    pub emulator_enabled: bool,
    /// Emulator TCP port
    pub emulator_port: u16,
    /// Minimum spacing of band-driven relay changes
    pub cooldown_ms: u64,
    /// Turn every relay off before exiting
    pub all_off_on_exit: bool,
    /// Antenna ports and the bands each one serves
    pub antenna_ports: Vec<AntennaPortConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broadcast_host: "0.0.0.0".to_string(),
            broadcast_port: DEFAULT_BROADCAST_PORT,
            relay: RelaySettings::default(),
            emulator_enabled: true,
            emulator_port: DEFAULT_CAT_PORT,
            cooldown_ms: SelectorConfig::default().cooldown.as_millis() as u64,
            all_off_on_exit: false,
            antenna_ports: PortConfigs::unassigned(DEFAULT_PORT_COUNT).ports().to_vec(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for antswitch
    /// Uses $XDG_CONFIG_HOME/antswitch, falls back to ~/.config/antswitch
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("antswitch"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("antswitch"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No settings at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring invalid settings file {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Save settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write settings to {}", path.display()))
    }

    pub fn port_configs(&self) -> PortConfigs {
        PortConfigs::new(self.antenna_ports.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.relay.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.relay.base_backoff_ms),
            reply_timeout: Duration::from_millis(self.relay.reply_timeout_ms),
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}
