use std::time::Duration;

use crate::filter::FilterPolicy;

pub const DEFAULT_HOST: &str = "euro.aprs2.net";

/// The user-defined filter port of APRS-IS servers.
pub const DEFAULT_PORT: u16 = 14580;

/// Receive-only login
pub const DEFAULT_CALLSIGN: &str = "N0CALL";
pub const DEFAULT_PASSCODE: i32 = -1;

/// Only position (`p`) and status (`s`) packets.
pub const DEFAULT_FILTER: &str = "t/ps";

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid login callsign: {value:?}")]
    InvalidCallsign { value: String },

    #[error("invalid client name or version: {value:?}")]
    InvalidClient { value: String },

    #[error("filter must be a single line: {value:?}")]
    InvalidFilter { value: String },

    #[error("at least one region prefix is required")]
    NoRegionPrefixes,

    #[error("{name} must not be zero")]
    ZeroDuration { name: &'static str },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Callsign used to log in. This doesn't need to be a real callsign for
    /// receive-only connections.
    pub callsign: String,

    /// APRS-IS passcode. `-1` for receive-only.
    pub passcode: i32,

    pub client_name: String,
    pub client_version: String,

    /// Server-side filter expression, e.g. `t/ps`
    pub filter: String,

    /// Senders must start with one of these.
    pub region_prefixes: Vec<char>,

    /// Reconnect if no line is received for this long.
    pub read_timeout: Duration,

    /// Delay between connection attempts.
    pub backoff: Duration,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_token(&self.callsign) {
            return Err(ConfigError::InvalidCallsign {
                value: self.callsign.clone(),
            });
        }

        for value in [&self.client_name, &self.client_version] {
            if !is_token(value) {
                return Err(ConfigError::InvalidClient {
                    value: value.clone(),
                });
            }
        }

        if self.filter.is_empty() || self.filter.contains(['\r', '\n']) {
            return Err(ConfigError::InvalidFilter {
                value: self.filter.clone(),
            });
        }

        if self.region_prefixes.is_empty() {
            return Err(ConfigError::NoRegionPrefixes);
        }

        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "read timeout",
            });
        }

        // otherwise a refused connection is retried in a hot loop
        if self.backoff.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "backoff" });
        }

        Ok(())
    }

    /// The line sent after the server banner.
    pub fn login_line(&self) -> String {
        format!(
            "user {} pass {} vers {} {} filter {}\n",
            self.callsign, self.passcode, self.client_name, self.client_version, self.filter
        )
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy::new(self.region_prefixes.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            callsign: DEFAULT_CALLSIGN.to_owned(),
            passcode: DEFAULT_PASSCODE,
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            filter: DEFAULT_FILTER.to_owned(),
            region_prefixes: FilterPolicy::default().region_prefixes().to_vec(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Non-empty and no whitespace, so it can't break up the login line.
fn is_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(char::is_whitespace)
}
