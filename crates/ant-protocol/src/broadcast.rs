//! Logger radio-info broadcast parsing
//!
//! Contest loggers announce the station's radio state as a small XML
//! datagram:
//!
//! ```text
//! <RadioInfo>
//!   <Freq>14195000</Freq>
//!   <TXFreq>14195000</TXFreq>
//!   <Mode>USB</Mode>
//!   <IsSplit>False</IsSplit>
//!   <ActiveRadioNr>1</ActiveRadioNr>
//!   <IsTransmitting>False</IsTransmitting>
//! </RadioInfo>
//! ```
//!
//! The parser is field-tolerant: a missing or malformed element falls back
//! to its default without discarding the rest of the message. Only a payload
//! with none of the known elements is rejected.

use std::time::Instant;

use crate::error::ParseError;
use crate::radio::{parse_frequency_hz, Mode, RadioState};

const FIELDS: [&str; 6] = [
    "Freq",
    "TXFreq",
    "Mode",
    "IsSplit",
    "ActiveRadioNr",
    "IsTransmitting",
];

/// Parse one broadcast payload into a [`RadioState`]
///
/// The transmit frequency equals the receive frequency unless the radio is
/// in split.
pub fn parse_radio_info(payload: &str) -> Result<RadioState, ParseError> {
    if FIELDS.iter().all(|name| element_text(payload, name).is_none()) {
        let preview: String = payload.chars().take(48).collect();
        return Err(ParseError::NoRadioFields(preview));
    }

    let rx_frequency_hz = frequency_field(payload, "Freq");
    let split = flag_field(payload, "IsSplit");
    let tx_frequency_hz = if split {
        frequency_field(payload, "TXFreq")
    } else {
        rx_frequency_hz
    };

    let mode = element_text(payload, "Mode")
        .map(Mode::from_label)
        .unwrap_or_default();

    let active_radio = element_text(payload, "ActiveRadioNr").and_then(|text| {
        let text = text.trim();
        match text.parse::<u32>() {
            Ok(nr) => Some(nr),
            Err(_) => {
                if !text.is_empty() {
                    tracing::debug!("Ignoring ActiveRadioNr value {:?}", text);
                }
                None
            }
        }
    });

    Ok(RadioState {
        rx_frequency_hz,
        tx_frequency_hz,
        mode,
        split,
        transmitting: flag_field(payload, "IsTransmitting"),
        active_radio,
        updated_at: Some(Instant::now()),
    })
}

/// Render a state as a broadcast payload (used by simulators and tests)
pub fn format_radio_info(state: &RadioState) -> String {
    fn freq(hz: Option<u64>) -> String {
        hz.map(|hz| hz.to_string()).unwrap_or_default()
    }
    let flag = |on: bool| if on { "True" } else { "False" };

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n<RadioInfo>\r\n\
         <Freq>{}</Freq>\r\n<TXFreq>{}</TXFreq>\r\n<Mode>{}</Mode>\r\n\
         <IsSplit>{}</IsSplit>\r\n<ActiveRadioNr>{}</ActiveRadioNr>\r\n\
         <IsTransmitting>{}</IsTransmitting>\r\n</RadioInfo>",
        freq(state.rx_frequency_hz),
        freq(state.tx_frequency_hz),
        if state.mode == Mode::Unknown {
            ""
        } else {
            state.mode.label()
        },
        flag(state.split),
        state
            .active_radio
            .map(|nr| nr.to_string())
            .unwrap_or_default(),
        flag(state.transmitting),
    )
}

/// Text of the first `<name>text</name>` element whose body holds no markup
fn element_text<'a>(payload: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);

    let mut rest = payload;
    while let Some(start) = rest.find(&open) {
        let body = &rest[start + open.len()..];
        let end = body.find('<').unwrap_or(body.len());
        if body[end..].starts_with(&close) {
            return Some(&body[..end]);
        }
        rest = body;
    }
    None
}

fn frequency_field(payload: &str, name: &'static str) -> Option<u64> {
    let text = element_text(payload, name)?;
    let hz = parse_frequency_hz(text);
    if hz.is_none() && !text.trim().is_empty() {
        tracing::debug!("Ignoring {} value {:?}", name, text);
    }
    hz
}

/// Case-insensitive `true`/`false`; anything else is false
fn flag_field(payload: &str, name: &'static str) -> bool {
    element_text(payload, name)
        .map(|text| text.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
