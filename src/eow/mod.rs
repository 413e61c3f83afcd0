//! Minimal client for the EyeOnWater cloud API.
//!
//! Only what the integration needs lives here: signing in, discovering the
//! meters attached to an account, and reading the latest register data for a
//! meter.

mod account;
mod client;
mod meter;

pub use account::Account;
pub use client::{build_session, Client, AUTH_ENDPOINT, METERS_ENDPOINT, SEARCH_ENDPOINT};
pub use meter::{Meter, MeterReading};

use thiserror::Error;

/// Errors reported by the EyeOnWater client.
#[derive(Debug, Error)]
pub enum Error {
    /// The API answered, but not with something usable.
    #[error("EyeOnWater API error: {0}")]
    Api(String),

    /// The credentials were rejected.
    #[error("EyeOnWater authentication failed: {0}")]
    Auth(String),

    #[error("request to EyeOnWater timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to decode EyeOnWater response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(error)
        }
    }
}
