//! Kenwood TS-590SG CAT subset
//!
//! Enough of the TS-590SG vocabulary for a logging program to poll a
//! "radio" whose state really comes from the broadcast feed. Every command
//! here is a query; set forms are answered with `?;`.
//!
//! # Format
//! - Commands: `XX;` where XX is a 2-letter command code
//! - Responses: `XXppppp;` with zero-padded fixed-width parameters
//! - Terminator: `;` (0x3B), or a line ending for clients that send lines
//!
//! # Commands
//! - `FA` / `FB` - VFO A / B frequency (11 digits)
//! - `MD` - Mode
//! - `TX` / `SP` - Transmit and split flags
//! - `IF` - Information (fixed 38-byte status sentence)
//! - `AI`, `ID`, `FV`, `TY`, `PS`, `DA`, `KS`, `SA` - constant identity answers

use crate::radio::RadioState;
use crate::ProtocolCodec;

/// Maximum command length (reasonable limit to prevent buffer overflow)
const MAX_COMMAND_LEN: usize = 64;

/// Length of an `IF` answer including the terminator
pub const IF_RESPONSE_LEN: usize = 38;

/// Answer for anything outside the vocabulary
pub const UNKNOWN_RESPONSE: &str = "?;";

/// Largest frequency representable in the 11-digit field
const MAX_FREQUENCY_HZ: u64 = 99_999_999_999;

/// TS-590SG query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KenwoodCommand {
    /// Auto-information query: AI;
    AutoInfo,
    /// Radio identification: ID;
    Id,
    /// Firmware version: FV;
    FirmwareVersion,
    /// Radio type: TY;
    Type,
    /// VFO A frequency: FA;
    FrequencyA,
    /// VFO B frequency: FB;
    FrequencyB,
    /// Mode: MD;
    Mode,
    /// Transmit state: TX;
    Transmit,
    /// Split state: SP;
    Split,
    /// Power state: PS;
    Power,
    /// Data mode: DA;
    DataMode,
    /// Keying speed: KS;
    KeyingSpeed,
    /// Satellite mode: SA;
    Satellite,
    /// Information/status: IF;
    Info,
    /// Bare terminator: ;
    Empty,
    /// Unknown/unrecognized command (or a set form)
    Unknown(String),
}

impl KenwoodCommand {
    /// Parse a command body (without terminator)
    ///
    /// Whitespace around the body is ignored and the code is matched
    /// case-insensitively.
    pub fn parse(body: &str) -> KenwoodCommand {
        let body = body.trim();
        if body.is_empty() {
            return KenwoodCommand::Empty;
        }

        match body.to_ascii_uppercase().as_str() {
            "AI" => KenwoodCommand::AutoInfo,
            "ID" => KenwoodCommand::Id,
            "FV" => KenwoodCommand::FirmwareVersion,
            "TY" => KenwoodCommand::Type,
            "FA" => KenwoodCommand::FrequencyA,
            "FB" => KenwoodCommand::FrequencyB,
            "MD" => KenwoodCommand::Mode,
            "TX" => KenwoodCommand::Transmit,
            "SP" => KenwoodCommand::Split,
            "PS" => KenwoodCommand::Power,
            "DA" => KenwoodCommand::DataMode,
            "KS" => KenwoodCommand::KeyingSpeed,
            "SA" => KenwoodCommand::Satellite,
            "IF" => KenwoodCommand::Info,
            _ => KenwoodCommand::Unknown(body.to_string()),
        }
    }

    /// Format the answer to this query from the current radio state
    pub fn respond(&self, state: &RadioState) -> String {
        match self {
            KenwoodCommand::AutoInfo => "AI0;".into(),
            KenwoodCommand::Id => "ID023;".into(),
            KenwoodCommand::FirmwareVersion => "FV1.04;".into(),
            KenwoodCommand::Type => "TYK 00;".into(),
            KenwoodCommand::FrequencyA => {
                format!("FA{};", format_frequency(state.rx_frequency_hz))
            }
            KenwoodCommand::FrequencyB => {
                format!("FB{};", format_frequency(state.tx_frequency_hz))
            }
            KenwoodCommand::Mode => format!("MD{};", state.mode.ts590_code()),
            KenwoodCommand::Transmit => format!("TX{};", u8::from(state.transmitting)),
            KenwoodCommand::Split => format!("SP{};", u8::from(state.split)),
            KenwoodCommand::Power => "PS1;".into(),
            KenwoodCommand::DataMode => "DA1;".into(),
            KenwoodCommand::KeyingSpeed => "KS030;".into(),
            KenwoodCommand::Satellite => "SA000;".into(),
            KenwoodCommand::Info => format_info(state),
            KenwoodCommand::Empty | KenwoodCommand::Unknown(_) => UNKNOWN_RESPONSE.into(),
        }
    }
}

/// 11-digit zero-padded frequency; unknown or oversized values are all zeros
pub fn format_frequency(hz: Option<u64>) -> String {
    match hz {
        Some(hz) if hz <= MAX_FREQUENCY_HZ => format!("{:011}", hz),
        _ => "0".repeat(11),
    }
}

/// Build the `IF` status sentence
///
/// Layout: frequency(11), 5 spaces, RIT/XIT offset(5), RIT(1), XIT(1),
/// memory channel(3), RX/TX(1), mode(1), function(1), scan(1), split(1),
/// CTCSS on(1), CTCSS code(2), constant `0`, terminator. Untracked fields
/// are zero.
pub fn format_info(state: &RadioState) -> String {
    format!(
        "IF{freq}     {offset}{rit}{xit}{memory}{tx}{mode}{function}{scan}{split}{tone}{tone_code}0;",
        freq = format_frequency(state.rx_frequency_hz),
        offset = "00000",
        rit = 0,
        xit = 0,
        memory = "000",
        tx = u8::from(state.transmitting),
        mode = state.mode.ts590_code(),
        function = 0,
        scan = 0,
        split = u8::from(state.split),
        tone = 0,
        tone_code = "00",
    )
}

/// Streaming Kenwood protocol codec
pub struct KenwoodCodec {
    buffer: Vec<u8>,
}

impl KenwoodCodec {
    /// Create a new Kenwood codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Number of buffered bytes not yet terminated
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for KenwoodCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for KenwoodCodec {
    type Command = KenwoodCommand;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_COMMAND_LEN * 4 {
            // Keep only the last portion
            let start = self.buffer.len() - MAX_COMMAND_LEN;
            self.buffer = self.buffer[start..].to_vec();
        }
    }

    fn next_command(&mut self) -> Option<Self::Command> {
        self.next_command_with_bytes().map(|(cmd, _)| cmd)
    }

    fn next_command_with_bytes(&mut self) -> Option<(Self::Command, Vec<u8>)> {
        loop {
            // A command ends at `;` or at the end of a line
            let term_pos = self
                .buffer
                .iter()
                .position(|&b| b == b';' || b == b'\n')?;

            let cmd_bytes: Vec<u8> = self.buffer.drain(..=term_pos).collect();
            let cmd_str = String::from_utf8_lossy(&cmd_bytes[..cmd_bytes.len() - 1]);

            // Blank CR/LF between commands is not a command
            if cmd_bytes.last() == Some(&b'\n') && cmd_str.trim().is_empty() {
                continue;
            }

            let cmd = KenwoodCommand::parse(&cmd_str);
            if let KenwoodCommand::Unknown(body) = &cmd {
                tracing::debug!("Unsupported Kenwood command: {:?}", body);
            }

            return Some((cmd, cmd_bytes));
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::Mode;
    use proptest::prelude::*;

    fn state(hz: u64) -> RadioState {
        RadioState {
            rx_frequency_hz: Some(hz),
            tx_frequency_hz: Some(hz),
            ..Default::default()
        }
    }

    fn answer(cmd: &str, state: &RadioState) -> String {
        let mut codec = KenwoodCodec::new();
        codec.push_bytes(cmd.as_bytes());
        codec.next_command().unwrap().respond(state)
    }

    #[test]
    fn test_constant_answers() {
        let s = RadioState::default();
        assert_eq!(answer("AI;", &s), "AI0;");
        assert_eq!(answer(";", &s), "?;");
        assert_eq!(answer("ID;", &s), "ID023;");
        assert_eq!(answer("FV;", &s), "FV1.04;");
        assert_eq!(answer("TY;", &s), "TYK 00;");
        assert_eq!(answer("PS;", &s), "PS1;");
        assert_eq!(answer("DA;", &s), "DA1;");
        assert_eq!(answer("KS;", &s), "KS030;");
        assert_eq!(answer("SA;", &s), "SA000;");
        assert_eq!(answer("XX;", &s), "?;");
        assert_eq!(answer("FA00014000000;", &s), "?;");
    }

    #[test]
    fn test_frequency_answers() {
        let s = state(14_195_000);
        assert_eq!(answer("FA;", &s), "FA00014195000;");
        assert_eq!(answer("FB;", &s), "FB00014195000;");
        assert_eq!(answer("FA;", &RadioState::default()), "FA00000000000;");
        assert_eq!(format_frequency(Some(100_000_000_000)), "00000000000");
    }

    #[test]
    fn test_mode_and_flags() {
        let mut s = state(14_195_000);
        s.mode = Mode::Usb;
        s.transmitting = true;
        assert_eq!(answer("MD;", &s), "MD2;");
        assert_eq!(answer("TX;", &s), "TX1;");
        assert_eq!(answer("SP;", &s), "SP0;");
        s.split = true;
        s.transmitting = false;
        assert_eq!(answer("SP;", &s), "SP1;");
        assert_eq!(answer("TX;", &s), "TX0;");
        assert_eq!(answer("md;", &s), "MD2;");
    }

    #[test]
    fn test_info_sentence() {
        let mut s = state(24_903_990);
        s.mode = Mode::Cw;
        assert_eq!(format_info(&s), "IF00024903990     0000000000030000000;");
        s.transmitting = true;
        s.split = true;
        assert_eq!(format_info(&s), "IF00024903990     0000000000130010000;");
        assert_eq!(format_info(&s).len(), IF_RESPONSE_LEN);
    }

    #[test]
    fn test_streaming_parse() {
        let mut codec = KenwoodCodec::new();
        codec.push_bytes(b"FA");
        assert!(codec.next_command().is_none());
        codec.push_bytes(b";\r\nMD;IF");
        assert_eq!(codec.next_command(), Some(KenwoodCommand::FrequencyA));
        assert_eq!(codec.next_command(), Some(KenwoodCommand::Mode));
        assert!(codec.next_command().is_none());
        assert_eq!(codec.pending(), 2);
    }

    #[test]
    fn test_line_terminated_commands() {
        let mut codec = KenwoodCodec::new();
        codec.push_bytes(b"\r\n\r\nHELLO\r\nfa\nSP;");
        assert_eq!(
            codec.next_command(),
            Some(KenwoodCommand::Unknown("HELLO".into()))
        );
        assert_eq!(codec.next_command(), Some(KenwoodCommand::FrequencyA));
        assert_eq!(codec.next_command(), Some(KenwoodCommand::Split));
        assert!(codec.next_command().is_none());
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn test_buffer_overflow_truncates() {
        let mut codec = KenwoodCodec::new();
        codec.push_bytes(&[b'X'; 300]);
        assert_eq!(codec.pending(), MAX_COMMAND_LEN);
        codec.clear();
        assert_eq!(codec.pending(), 0);
    }

    proptest! {
        #[test]
        fn info_length_is_fixed(
            hz in proptest::option::of(any::<u64>()),
            tx in any::<bool>(),
            split in any::<bool>(),
        ) {
            let s = RadioState {
                rx_frequency_hz: hz,
                transmitting: tx,
                split,
                ..Default::default()
            };
            prop_assert_eq!(format_info(&s).len(), IF_RESPONSE_LEN);
        }
    }
}
