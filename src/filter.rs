use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::aprs::Position;

/// SSID separator in sender callsigns, e.g. `M0ABC-9`
const SSID_SEPARATOR: char = '-';

/// Decides which positions are passed on to the observer.
#[derive(Clone, Debug)]
pub struct FilterPolicy {
    /// The sender's callsign must start with one of these.
    region_prefixes: Vec<char>,
}

impl FilterPolicy {
    pub fn new(region_prefixes: Vec<char>) -> Self {
        Self { region_prefixes }
    }

    pub fn region_prefixes(&self) -> &[char] {
        &self.region_prefixes
    }

    /// Evaluates the rules in order, rejecting on the first that matches.
    pub fn evaluate(&self, sender: &str, position: &Position) -> FilterDecision {
        let latitude = position.latitude;
        let longitude = position.longitude;

        // integral coordinates are placeholder fixes (e.g. fully ambiguous positions)
        if latitude.fract() == 0.0 && longitude.fract() == 0.0 {
            return FilterDecision::Reject(Rejection::IntegralCoordinates);
        }

        if position.position_unknown {
            return FilterDecision::Reject(Rejection::PositionUnknown);
        }

        if latitude == 0.0 && longitude == 0.0 {
            return FilterDecision::Reject(Rejection::NullIsland);
        }

        if !sender
            .chars()
            .next()
            .is_some_and(|first| self.region_prefixes.contains(&first))
        {
            return FilterDecision::Reject(Rejection::RegionPrefix);
        }

        let callsign = base_callsign(sender);
        if !is_callsign(callsign) {
            return FilterDecision::Reject(Rejection::CallsignSyntax);
        }

        FilterDecision::Accept(Sighting {
            callsign: callsign.to_owned(),
            sender: sender.to_owned(),
            latitude,
            longitude,
            altitude: position.altitude.filter(|altitude| !altitude.is_nan()),
        })
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(vec!['M', 'G', '2'])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterDecision {
    Accept(Sighting),
    Reject(Rejection),
}

/// The rule that rejected a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
    IntegralCoordinates,
    PositionUnknown,
    NullIsland,
    RegionPrefix,
    CallsignSyntax,
}

/// A position that passed the filter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sighting {
    /// Callsign without SSID
    pub callsign: String,

    /// Callsign with SSID, as sent
    pub sender: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Altitude in meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

pub fn base_callsign(sender: &str) -> &str {
    sender
        .split_once(SSID_SEPARATOR)
        .map_or(sender, |(callsign, _ssid)| callsign)
}

/// Checks that the string starts with 1-2 alphanumerics, a digit, and 1-4
/// alphanumerics.
///
/// Only the start is anchored, so trailing characters don't matter.
pub fn is_callsign(callsign: &str) -> bool {
    callsign_pattern().is_match(callsign)
}

fn callsign_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]{1,2}[0-9][A-Za-z0-9]{1,4}").expect("invalid callsign pattern")
    })
}
