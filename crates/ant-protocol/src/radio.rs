//! Radio state snapshot shared by the relay selector and the CAT emulator

use std::fmt;
use std::time::Instant;

use crate::band::Band;

/// Operating mode as reported by the logging software
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    Cw,
    Usb,
    Lsb,
    Fm,
    Am,
    #[default]
    Unknown,
}

impl Mode {
    /// Parse a mode label, ignoring case and surrounding whitespace
    pub fn from_label(label: &str) -> Mode {
        match label.trim().to_ascii_uppercase().as_str() {
            "CW" => Mode::Cw,
            "USB" => Mode::Usb,
            "LSB" => Mode::Lsb,
            "FM" => Mode::Fm,
            "AM" => Mode::Am,
            _ => Mode::Unknown,
        }
    }

    /// TS-590SG `MD` code (1=LSB, 2=USB, 3=CW, 4=FM, 5=AM, 0=unknown)
    pub fn ts590_code(self) -> u8 {
        match self {
            Mode::Lsb => 1,
            Mode::Usb => 2,
            Mode::Cw => 3,
            Mode::Fm => 4,
            Mode::Am => 5,
            Mode::Unknown => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Cw => "CW",
            Mode::Usb => "USB",
            Mode::Lsb => "LSB",
            Mode::Fm => "FM",
            Mode::Am => "AM",
            Mode::Unknown => "?",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Latest known state of the radio
///
/// Replaced wholesale on every update; fields are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioState {
    /// Receive frequency in Hz
    pub rx_frequency_hz: Option<u64>,
    /// Transmit frequency in Hz
    pub tx_frequency_hz: Option<u64>,
    pub mode: Mode,
    pub split: bool,
    pub transmitting: bool,
    /// Which radio the logger considers active (SO2R setups)
    pub active_radio: Option<u32>,
    /// When this snapshot was produced
    #[cfg_attr(feature = "serde", serde(skip))]
    pub updated_at: Option<Instant>,
}

impl RadioState {
    /// Band of the receive frequency
    pub fn band(&self) -> Band {
        self.rx_frequency_hz
            .map(Band::from_hz)
            .unwrap_or(Band::Unknown)
    }

    /// Stamp the snapshot with the current time
    pub fn touched(mut self) -> Self {
        self.updated_at = Some(Instant::now());
        self
    }
}

/// Parse a frequency in Hz from feed text
///
/// Integers are taken as-is. A non-negative decimal ("14195000.0") is
/// rounded to the nearest Hz. Anything else is `None`.
pub fn parse_frequency_hz(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(hz) = text.parse::<u64>() {
        return Some(hz);
    }
    let value = text.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 || value >= u64::MAX as f64 {
        return None;
    }
    Some(value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_label() {
        assert_eq!(Mode::from_label("USB"), Mode::Usb);
        assert_eq!(Mode::from_label("usb"), Mode::Usb);
        assert_eq!(Mode::from_label(" cw "), Mode::Cw);
        assert_eq!(Mode::from_label("RTTY"), Mode::Unknown);
        assert_eq!(Mode::from_label(""), Mode::Unknown);
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(Mode::Lsb.ts590_code(), 1);
        assert_eq!(Mode::Usb.ts590_code(), 2);
        assert_eq!(Mode::Cw.ts590_code(), 3);
        assert_eq!(Mode::Fm.ts590_code(), 4);
        assert_eq!(Mode::Am.ts590_code(), 5);
        assert_eq!(Mode::Unknown.ts590_code(), 0);
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency_hz("14195000"), Some(14_195_000));
        assert_eq!(parse_frequency_hz("14195000.4"), Some(14_195_000));
        assert_eq!(parse_frequency_hz("14195000.5"), Some(14_195_001));
        assert_eq!(parse_frequency_hz(""), None);
        assert_eq!(parse_frequency_hz("   "), None);
        assert_eq!(parse_frequency_hz("twenty"), None);
        assert_eq!(parse_frequency_hz("-1.5"), None);
        assert_eq!(parse_frequency_hz("NaN"), None);
        assert_eq!(parse_frequency_hz("inf"), None);
    }

    #[test]
    fn test_band_of_state() {
        let state = RadioState {
            rx_frequency_hz: Some(3_573_000),
            ..Default::default()
        };
        assert_eq!(state.band(), Band::M80);
        assert_eq!(RadioState::default().band(), Band::Unknown);
    }
}
