//! Relay controller text protocol
//!
//! The controller speaks comma-delimited ASCII over UDP. Every request is
//! echoed back with `,OK` appended when it was accepted.
//!
//! # Commands
//! - `RELAY-AOF-255,1,1` - all relays off
//! - `RELAY-SET-255,<id>,<0|1>` - switch one relay
//! - `RELAY-STATE-255` - query; reply `RELAY-STATE-255,<high>,<low>,OK`

use std::fmt;

use crate::error::ProtocolError;

/// Number of relays on the controller
pub const RELAY_COUNT: u8 = 16;

const STATE_QUERY: &str = "RELAY-STATE-255";
const ALL_OFF: &str = "RELAY-AOF-255,1,1";
const SET_PREFIX: &str = "RELAY-SET-255";
const OK: &str = "OK";

/// Check that a relay id is addressable (1..=16)
pub fn validate_relay(relay: u8) -> Result<u8, ProtocolError> {
    if (1..=RELAY_COUNT).contains(&relay) {
        Ok(relay)
    } else {
        Err(ProtocolError::RelayOutOfRange(relay))
    }
}

/// A request to the relay controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    /// Turn every relay off
    AllOff,
    /// Switch a single relay
    Set { relay: u8, on: bool },
    /// Read the on/off state of all relays
    QueryState,
}

impl RelayCommand {
    /// Wire text of the request
    pub fn encode(&self) -> String {
        match self {
            RelayCommand::AllOff => ALL_OFF.to_string(),
            RelayCommand::Set { relay, on } => {
                format!("{},{},{}", SET_PREFIX, relay, u8::from(*on))
            }
            RelayCommand::QueryState => STATE_QUERY.to_string(),
        }
    }

    /// Literal the reply must contain for the command to count as accepted
    ///
    /// For [`RelayCommand::QueryState`] this is only the prefix; the payload
    /// is checked by [`parse_state_reply`].
    pub fn expected_reply(&self) -> String {
        match self {
            RelayCommand::QueryState => STATE_QUERY.to_string(),
            other => format!("{},{}", other.encode(), OK),
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// On/off state of all sixteen relays
///
/// Bit `i - 1` set means relay `i` is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RelayMask(u16);

impl RelayMask {
    pub const NONE: RelayMask = RelayMask(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Mask with only `relay` on
    pub fn only(relay: u8) -> Self {
        Self::NONE.with(relay, true)
    }

    pub fn is_on(self, relay: u8) -> bool {
        (1..=RELAY_COUNT).contains(&relay) && self.0 & (1 << (relay - 1)) != 0
    }

    /// Copy with one relay switched. Out-of-range ids are ignored.
    pub fn with(self, relay: u8, on: bool) -> Self {
        if !(1..=RELAY_COUNT).contains(&relay) {
            return self;
        }
        let bit = 1u16 << (relay - 1);
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    /// Relays that are on, lowest id first
    pub fn on_relays(self) -> impl Iterator<Item = u8> {
        (1..=RELAY_COUNT).filter(move |relay| self.is_on(*relay))
    }

    /// The relay that is on, if exactly one is
    pub fn sole_on(self) -> Option<u8> {
        if self.0.count_ones() == 1 {
            Some(self.0.trailing_zeros() as u8 + 1)
        } else {
            None
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Parse the reply to [`RelayCommand::QueryState`]
///
/// Accepts `RELAY-STATE-255,<high>,<low>,OK`, optionally wrapped in square
/// brackets, where high and low are decimal bytes.
pub fn parse_state_reply(reply: &str) -> Result<RelayMask, ProtocolError> {
    let unexpected = || ProtocolError::UnexpectedReply {
        command: STATE_QUERY.to_string(),
        reply: reply.to_string(),
    };

    let body = reply.trim();
    let body = body
        .strip_prefix('[')
        .and_then(|b| b.strip_suffix(']'))
        .unwrap_or(body);

    let fields: Vec<&str> = body.split(',').map(str::trim).collect();
    match fields.as_slice() {
        [STATE_QUERY, high, low, OK] => {
            let high = high.parse::<u8>().map_err(|_| unexpected())?;
            let low = low.parse::<u8>().map_err(|_| unexpected())?;
            Ok(RelayMask::from_bits(u16::from(high) << 8 | u16::from(low)))
        }
        _ => Err(unexpected()),
    }
}
