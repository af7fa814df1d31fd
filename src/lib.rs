//! # APRS-IS listener
//!
//! A long-lived client for the [APRS-IS][1] feed. It logs in with a
//! server-side filter, decodes the packets it receives, and passes positions
//! that match a [`FilterPolicy`][filter::FilterPolicy] on to an
//! [`Observer`][observer::Observer].
//!
//! The connection is re-established whenever it fails, is closed, or goes
//! quiet for too long.
//!
//! [1]: https://www.aprs-is.net/

pub mod aprs;
pub mod config;
pub mod filter;
pub mod observer;
pub mod reader;
pub mod session;
