//! Antenna Switch Protocol Library
//!
//! This crate provides the wire and data layer for an antenna relay switch
//! that follows the radio's band:
//!
//! - **Bands**: frequency to band decoding with fixed inclusive edges
//! - **Radio state**: the snapshot shared by the relay selector and the CAT emulator
//! - **Logger broadcasts**: tolerant parsing of `RadioInfo` XML datagrams
//! - **Relay controller**: comma-delimited UDP text commands and replies
//! - **Kenwood**: TS-590SG query subset answered from cached radio state
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O. Each module is a pure parser or
//! encoder so that the networked engine (`ant-switch`) and the simulators
//! (`ant-sim`) share one definition of every format.
//!
//! # Example
//!
//! ```rust
//! use ant_protocol::{Band, ProtocolCodec};
//! use ant_protocol::broadcast::parse_radio_info;
//! use ant_protocol::kenwood::KenwoodCodec;
//!
//! let state = parse_radio_info("<RadioInfo><Freq>14195000</Freq><Mode>USB</Mode></RadioInfo>").unwrap();
//! assert_eq!(state.band(), Band::M20);
//!
//! let mut codec = KenwoodCodec::new();
//! codec.push_bytes(b"FA;");
//! let cmd = codec.next_command().unwrap();
//! assert_eq!(cmd.respond(&state), "FA00014195000;");
//! ```

pub mod band;
pub mod broadcast;
pub mod error;
pub mod kenwood;
pub mod radio;
pub mod relay;

pub use band::{Band, BandSet};
pub use error::{ParseError, ProtocolError};
pub use radio::{Mode, RadioState};
pub use relay::{RelayCommand, RelayMask, RELAY_COUNT};

/// Trait for protocol codecs that can parse incoming data streams
pub trait ProtocolCodec {
    /// The command type produced by this codec
    type Command;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete command from the buffer
    fn next_command(&mut self) -> Option<Self::Command>;

    /// Try to extract the next complete command along with its raw bytes
    ///
    /// This is useful for traffic logging where we want to show the exact
    /// bytes that were parsed for each command.
    fn next_command_with_bytes(&mut self) -> Option<(Self::Command, Vec<u8>)>;

    /// Clear the internal buffer
    fn clear(&mut self);
}
