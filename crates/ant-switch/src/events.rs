//! Event stream for relay and band changes
//!
//! The selector and the band-following coordinator publish every state
//! change on a broadcast channel. Observers subscribe for a receiver and
//! unsubscribe by dropping it.

use ant_protocol::Band;

/// Relay switch activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// A relay became the sole selected relay
    RelaySelected {
        /// Previously selected relay
        from: Option<u8>,
        /// Newly selected relay
        to: u8,
        /// Band the selection was made for (Unknown for direct control)
        band: Band,
    },

    /// A single relay was switched outside an exclusive selection
    RelayChanged { relay: u8, on: bool },

    /// Every relay was turned off
    AllRelaysOff,

    /// The radio moved to a different band
    BandChanged { from: Band, to: Band },

    /// An operation failed
    Error {
        /// Source of the error
        source: String,
        /// Error message
        message: String,
    },
}

impl SwitchEvent {
    /// Check if this event changed which relays are on
    pub fn is_relay_change(&self) -> bool {
        matches!(
            self,
            SwitchEvent::RelaySelected { .. }
                | SwitchEvent::RelayChanged { .. }
                | SwitchEvent::AllRelaysOff
        )
    }

    /// Relay that is on after this event, if the event determines it
    pub fn selected_relay(&self) -> Option<u8> {
        match self {
            SwitchEvent::RelaySelected { to, .. } => Some(*to),
            SwitchEvent::RelayChanged { relay, on: true } => Some(*relay),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_change_classification() {
        let selected = SwitchEvent::RelaySelected {
            from: None,
            to: 3,
            band: Band::M20,
        };
        assert!(selected.is_relay_change());
        assert_eq!(selected.selected_relay(), Some(3));

        assert!(SwitchEvent::AllRelaysOff.is_relay_change());
        assert_eq!(SwitchEvent::AllRelaysOff.selected_relay(), None);

        let band = SwitchEvent::BandChanged {
            from: Band::M40,
            to: Band::M20,
        };
        assert!(!band.is_relay_change());

        let off = SwitchEvent::RelayChanged { relay: 2, on: false };
        assert_eq!(off.selected_relay(), None);
    }
}
