//! # Format
//!
//! - [APRS 1.01 protocol reference][1]
//! - [APRS-IS server filters][2]
//!
//! Only what's needed to extract positions is decoded. Other packet types are
//! classified by their data type identifier and passed through as
//! [`Report::Other`] or [`Report::Unsupported`].
//!
//! [1]: http://www.aprs.org/doc/APRS101.PDF
//! [2]: https://www.aprs-is.net/javAPRSFilter.aspx

mod position;

use std::{
    fmt::Display,
    str::FromStr,
};

pub use self::position::Position;

/// Callsign (6) + `-` + SSID (2)
const MAX_SENDER_LENGTH: usize = 9;

/// Addressees in messages are padded to this length.
const ADDRESSEE_LENGTH: usize = 9;

#[derive(Debug, thiserror::Error)]
#[error("aprs decode error")]
pub enum DecodeError {
    MissingHeader,
    #[error("invalid sender: {value}")]
    InvalidSender {
        value: String,
    },
    MissingDestination,
    EmptyInformation,
    Truncated,
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp {
        value: String,
    },
    #[error("invalid latitude: {value}")]
    InvalidLatitude {
        value: String,
    },
    #[error("invalid longitude: {value}")]
    InvalidLongitude {
        value: String,
    },
    #[error("invalid symbol table: {value:?}")]
    InvalidSymbolTable {
        value: char,
    },
    InvalidCompressed,
    InvalidAddressee,
}

/// A decoded APRS-IS line: `SENDER>DESTINATION,PATH...:INFORMATION`
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Callsign with optional SSID suffix, e.g. `M0ABC-9`
    pub sender: String,
    pub destination: String,
    pub path: Vec<String>,
    pub report: Report,
}

impl FromStr for Packet {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, information) = s.split_once(':').ok_or(DecodeError::MissingHeader)?;
        let (sender, route) = header.split_once('>').ok_or(DecodeError::MissingHeader)?;

        if !is_valid_sender(sender) {
            return Err(DecodeError::InvalidSender {
                value: sender.to_owned(),
            });
        }

        let mut route = route.split(',');
        let destination = route
            .next()
            .filter(|destination| !destination.is_empty())
            .ok_or(DecodeError::MissingDestination)?;
        let path = route.map(ToOwned::to_owned).collect();

        Ok(Self {
            sender: sender.to_owned(),
            destination: destination.to_owned(),
            path,
            report: information.parse()?,
        })
    }
}

fn is_valid_sender(sender: &str) -> bool {
    !sender.is_empty()
        && sender.len() <= MAX_SENDER_LENGTH
        && sender
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
}

/// The information field of a packet, by data type.
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Position(Position),
    Status {
        /// Present if the status starts with a Maidenhead locator.
        position: Option<Position>,
        text: String,
    },
    Message {
        addressee: String,
        text: String,
    },
    /// A data type identifier we don't decode (Mic-E, raw GPS, or unknown).
    Unsupported(char),
    /// A packet type we recognize, but don't care about.
    Other(ReportKind),
}

impl FromStr for Report {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let data_type = chars.next().ok_or(DecodeError::EmptyInformation)?;
        let body = chars.as_str();

        let report = match data_type {
            '!' | '=' => Self::Position(position::parse(body)?),
            '/' | '@' => Self::Position(position::parse(strip_timestamp(body)?)?),
            '>' => parse_status(body),
            ':' => parse_message(body)?,
            ';' => Self::Other(ReportKind::Object),
            ')' => Self::Other(ReportKind::Item),
            'T' => Self::Other(ReportKind::Telemetry),
            '_' => Self::Other(ReportKind::Weather),
            '?' => Self::Other(ReportKind::Query),
            '<' => Self::Other(ReportKind::Capabilities),
            '{' => Self::Other(ReportKind::UserDefined),
            '}' => Self::Other(ReportKind::ThirdParty),
            _ => Self::Unsupported(data_type),
        };

        Ok(report)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Object,
    Item,
    Telemetry,
    Weather,
    Query,
    Capabilities,
    UserDefined,
    ThirdParty,
}

impl ReportKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Item => "item",
            Self::Telemetry => "telemetry",
            Self::Weather => "weather",
            Self::Query => "query",
            Self::Capabilities => "capabilities",
            Self::UserDefined => "user-defined",
            Self::ThirdParty => "third-party",
        }
    }
}

impl Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Strips a `DDHHMMz`, `DDHHMM/` or `HHMMSSh` timestamp.
fn strip_timestamp(body: &str) -> Result<&str, DecodeError> {
    let invalid = || {
        DecodeError::InvalidTimestamp {
            value: body.chars().take(7).collect(),
        }
    };

    let timestamp = body.as_bytes().get(..7).ok_or_else(invalid)?;
    if !timestamp[..6].iter().all(u8::is_ascii_digit) || !matches!(timestamp[6], b'z' | b'/' | b'h')
    {
        return Err(invalid());
    }

    Ok(&body[7..])
}

fn parse_status(body: &str) -> Report {
    if let Some((position, text)) = position::parse_locator(body) {
        return Report::Status {
            position: Some(position),
            text: text.to_owned(),
        };
    }

    // status reports may only carry a `DDHHMMz` timestamp
    let text = match body.as_bytes().get(..7) {
        Some(timestamp)
            if timestamp[..6].iter().all(u8::is_ascii_digit) && timestamp[6] == b'z' =>
        {
            &body[7..]
        }
        _ => body,
    };

    Report::Status {
        position: None,
        text: text.to_owned(),
    }
}

fn parse_message(body: &str) -> Result<Report, DecodeError> {
    let addressee = body
        .get(..ADDRESSEE_LENGTH)
        .ok_or(DecodeError::InvalidAddressee)?;
    let text = body[ADDRESSEE_LENGTH..]
        .strip_prefix(':')
        .ok_or(DecodeError::InvalidAddressee)?;

    let addressee = addressee.trim_end();
    if addressee.is_empty() {
        return Err(DecodeError::InvalidAddressee);
    }

    // drop the message number
    let text = text.split_once('{').map_or(text, |(text, _)| text);

    Ok(Report::Message {
        addressee: addressee.to_owned(),
        text: text.to_owned(),
    })
}
