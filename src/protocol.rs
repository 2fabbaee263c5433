//! ==============================================================================
//! protocol.rs - device wire protocol
//! ==============================================================================
//!
//! purpose:
//!     decodes what devices send over the ingestion socket and defines the
//!     acknowledgment texts sent back.
//!
//! wire format:
//!     there is no framing. one receive call (up to RECV_CHUNK bytes) is one
//!     message, decoded as utf-8 and trimmed. accepted payloads:
//!
//! ```text
//!         {"temperature": 21.5, "humidity": 47.2}
//!         21.5!47.2
//!
//!     the exact text `!DISCONNECT` ends the session.
//! ```
//!
//! decoding:
//!     decoders are tried in order. each one either does not apply to the
//!     payload (returns None) or applies and yields a value or an error.
//!     the first decoder that applies decides the outcome, so a payload that
//!     looks like an object but is not valid json falls through to the
//!     separated form, while a valid object with a bad field is rejected.
//!
//! relationships:
//!     - used by: session.rs (classify, parse_payload, Ack)
//!     - uses: error.rs (ParseError)
//!
//! ==============================================================================

use std::fmt;

use crate::error::ParseError;

/// max bytes read per receive call
pub const RECV_CHUNK: usize = 1024;

/// control token that ends a session
pub const DISCONNECT_MESSAGE: &str = "!DISCONNECT";

const SEPARATOR: char = '!';

/// decoded sensor values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature: f64,
    pub humidity: f64,
}

/// what a single received chunk means to the session
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// whitespace only, ignored
    Empty,
    /// peer asked to close
    Disconnect,
    /// trimmed text to hand to the parser
    Payload(&'a str),
}

pub fn classify(text: &str) -> Inbound<'_> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Inbound::Empty
    } else if trimmed == DISCONNECT_MESSAGE {
        Inbound::Disconnect
    } else {
        Inbound::Payload(trimmed)
    }
}

// ==============================================================================
// decoders
// ==============================================================================

trait PayloadDecoder: Sync {
    /// None when the payload is not in this decoder's format
    fn decode(&self, payload: &str) -> Option<Result<Measurement, ParseError>>;
}

/// `{"temperature": <number>, "humidity": <number>}`
struct ObjectDecoder;

impl PayloadDecoder for ObjectDecoder {
    fn decode(&self, payload: &str) -> Option<Result<Measurement, ParseError>> {
        if !(payload.starts_with('{') && payload.ends_with('}')) {
            return None;
        }

        // malformed object syntax is not ours to reject
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;

        let field = |name: &str| value.get(name).and_then(serde_json::Value::as_f64);
        Some(match (field("temperature"), field("humidity")) {
            (Some(temperature), Some(humidity)) => Ok(Measurement { temperature, humidity }),
            _ => Err(ParseError::InvalidPayload),
        })
    }
}

/// `<number>!<number>`
struct SeparatedDecoder;

impl PayloadDecoder for SeparatedDecoder {
    fn decode(&self, payload: &str) -> Option<Result<Measurement, ParseError>> {
        if !payload.contains(SEPARATOR) {
            return None;
        }

        let parts: Vec<&str> = payload.split(SEPARATOR).collect();
        let [temperature, humidity] = parts.as_slice() else {
            return Some(Err(ParseError::MalformedSeparatedMessage));
        };

        Some(
            parse_number(temperature)
                .zip(parse_number(humidity))
                .map(|(temperature, humidity)| Measurement { temperature, humidity })
                .ok_or(ParseError::NonNumericValue),
        )
    }
}

fn parse_number(part: &str) -> Option<f64> {
    part.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

static DECODERS: [&dyn PayloadDecoder; 2] = [&ObjectDecoder, &SeparatedDecoder];

/// decode a trimmed, non-empty payload
pub fn parse_payload(payload: &str) -> Result<Measurement, ParseError> {
    DECODERS
        .iter()
        .find_map(|decoder| decoder.decode(payload))
        .unwrap_or(Err(ParseError::UnrecognizedFormat))
}

// ==============================================================================
// acknowledgments
// ==============================================================================

/// reply sent to the device after each payload
#[derive(Debug, PartialEq)]
pub enum Ack {
    Saved,
    InvalidFormat(ParseError),
    SaveFailed,
    NotPersisted,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ack::Saved => f.write_str("Msg and data saved"),
            Ack::InvalidFormat(reason) => write!(f, "Error: Invalid data format ({})", reason),
            Ack::SaveFailed => f.write_str("Error: Database save failed"),
            Ack::NotPersisted => f.write_str("Msg received (DB not connected)"),
        }
    }
}
