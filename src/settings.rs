use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_flow::{UserInput, DEFAULT_EOW_DOMAIN};
use crate::constants::DEFAULT_SCAN_INTERVAL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Required to set {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: `{value}`")]
    Invalid { name: &'static str, value: String },
}

/// Runtime configuration, read from the environment
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub domain: String,
    pub username: String,
    pub password: String,
    pub scan_interval: Duration,
    pub state_dir: PathBuf,
    /// Replaces `https://<hostname>` for every request
    pub base_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let scan_interval = match non_empty("EOW_SCAN_INTERVAL") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(SettingsError::Invalid {
                        name: "EOW_SCAN_INTERVAL",
                        value,
                    })
                }
            },
            None => DEFAULT_SCAN_INTERVAL,
        };

        Ok(Self {
            domain: non_empty("EOW_DOMAIN").unwrap_or_else(|| DEFAULT_EOW_DOMAIN.to_string()),
            username: non_empty("EOW_USERNAME").ok_or(SettingsError::Missing("EOW_USERNAME"))?,
            password: non_empty("EOW_PASSWORD").ok_or(SettingsError::Missing("EOW_PASSWORD"))?,
            scan_interval,
            state_dir: non_empty("EOW_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            base_url: non_empty("EOW_BASE_URL"),
        })
    }

    /// The credentials as a config flow submission
    pub fn user_input(&self) -> UserInput {
        UserInput {
            domain: self.domain.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scan_interval", &self.scan_interval)
            .field("state_dir", &self.state_dir)
            .field("base_url", &self.base_url)
            .finish()
    }
}
