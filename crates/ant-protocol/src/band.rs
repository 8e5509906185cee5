//! Amateur band decoding
//!
//! Frequencies map onto the ten HF/6m allocations with fixed inclusive
//! ranges. Anything outside those ranges, or anything that does not parse
//! as a frequency, is [`Band::Unknown`].

use std::fmt;

use crate::radio::parse_frequency_hz;

/// Band code carried on the wire and in port configurations
///
/// Numbering is 1-based so that 0 means "no band".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Band {
    #[default]
    Unknown = 0,
    M160 = 1,
    M80 = 2,
    M40 = 3,
    M30 = 4,
    M20 = 5,
    M17 = 6,
    M15 = 7,
    M12 = 8,
    M10 = 9,
    M6 = 10,
}

/// Inclusive edges in Hz, indexed by `number() - 1`
const BAND_EDGES: [(u64, u64); 10] = [
    (1_810_000, 2_000_000),
    (3_500_000, 3_800_000),
    (7_000_000, 7_200_000),
    (10_100_000, 10_150_000),
    (14_000_000, 14_350_000),
    (18_068_000, 18_168_000),
    (21_000_000, 21_450_000),
    (24_890_000, 24_990_000),
    (28_000_000, 29_700_000),
    (50_000_000, 54_000_000),
];

impl Band {
    /// The ten real bands, lowest frequency first
    pub const ALL: [Band; 10] = [
        Band::M160,
        Band::M80,
        Band::M40,
        Band::M30,
        Band::M20,
        Band::M17,
        Band::M15,
        Band::M12,
        Band::M10,
        Band::M6,
    ];

    /// Map a frequency in Hz to its band
    pub fn from_hz(hz: u64) -> Band {
        Band::ALL
            .iter()
            .zip(BAND_EDGES.iter())
            .find(|(_, (low, high))| (*low..=*high).contains(&hz))
            .map(|(band, _)| *band)
            .unwrap_or(Band::Unknown)
    }

    /// Decode a frequency as it arrives from the broadcast feed
    ///
    /// Empty or non-numeric text decodes to [`Band::Unknown`].
    pub fn decode(text: &str) -> Band {
        parse_frequency_hz(text)
            .map(Band::from_hz)
            .unwrap_or(Band::Unknown)
    }

    /// Band number (0 for unknown, 1..=10 otherwise)
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Look up a band by its number
    pub fn from_number(number: u8) -> Option<Band> {
        match number {
            0 => Some(Band::Unknown),
            1..=10 => Some(Band::ALL[usize::from(number - 1)]),
            _ => None,
        }
    }

    /// Inclusive frequency edges, `None` for [`Band::Unknown`]
    pub fn edges(self) -> Option<(u64, u64)> {
        match self {
            Band::Unknown => None,
            band => Some(BAND_EDGES[usize::from(band.number() - 1)]),
        }
    }

    /// Display label ("160m" .. "6m", "None")
    pub fn label(self) -> &'static str {
        match self {
            Band::Unknown => "None",
            Band::M160 => "160m",
            Band::M80 => "80m",
            Band::M40 => "40m",
            Band::M30 => "30m",
            Band::M20 => "20m",
            Band::M17 => "17m",
            Band::M15 => "15m",
            Band::M12 => "12m",
            Band::M10 => "10m",
            Band::M6 => "6m",
        }
    }

    /// Bit for this band inside a [`BandSet`]
    fn bit(self) -> u16 {
        match self {
            Band::Unknown => 0,
            band => 1 << (band.number() - 1),
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of bands an antenna port can serve
///
/// Stored as a 10-bit mask with bit `n - 1` standing for band `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BandSet(u16);

impl BandSet {
    const MASK: u16 = 0x03FF;

    /// No bands
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every band
    pub const fn all() -> Self {
        Self(Self::MASK)
    }

    /// Build from a raw mask, ignoring bits above the tenth
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Add a band, builder style
    pub fn with(mut self, band: Band) -> Self {
        self.insert(band);
        self
    }

    pub fn insert(&mut self, band: Band) {
        self.0 |= band.bit();
    }

    pub fn remove(&mut self, band: Band) {
        self.0 &= !band.bit();
    }

    /// Whether the set covers `band`. Always false for [`Band::Unknown`].
    pub fn contains(self, band: Band) -> bool {
        band != Band::Unknown && self.0 & band.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the bands in this set, lowest frequency first
    pub fn iter(self) -> impl Iterator<Item = Band> {
        Band::ALL.into_iter().filter(move |band| self.contains(*band))
    }
}

impl FromIterator<Band> for BandSet {
    fn from_iter<I: IntoIterator<Item = Band>>(iter: I) -> Self {
        iter.into_iter()
            .fold(BandSet::empty(), |set, band| set.with(band))
    }
}
