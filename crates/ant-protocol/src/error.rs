//! Error types for protocol parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Unknown or unsupported command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Invalid frequency value
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),

    /// Broadcast payload carried none of the radio fields
    #[error("no radio fields in broadcast: {0}")]
    NoRadioFields(String),

    /// A numeric field could not be parsed
    #[error("invalid {field} value: {value}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw text
        value: String,
    },
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Relay controller answered with something other than the expected shape
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// Command that was sent
        command: String,
        /// Reply text as received
        reply: String,
    },

    /// Relay id outside the addressable range
    #[error("relay {0} out of range 1..=16")]
    RelayOutOfRange(u8),
}
