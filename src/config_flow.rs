//! Interactive setup for an EyeOnWater account.
//!
//! The user step collects the regional domain and credentials, signs in to
//! confirm them, and creates a config entry. Failures keep the flow on the form
//! with an error code; an account that is already configured aborts the flow.

use std::collections::BTreeMap;
use std::future::Future;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::config_entries::{ConfigEntries, ConfigEntry};
use crate::eow::{self, Account, Client};

pub const VERSION: u32 = 1;

pub const CONF_DOMAIN: &str = "domain";
pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";

pub const STEP_USER: &str = "user";
pub const ERROR_BASE: &str = "base";
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

pub const DEFAULT_EOW_DOMAIN: &str = "com";
pub const SUPPORTED_EOW_DOMAINS: [&str; 2] = ["com", "ca"];

fn default_domain() -> String {
    DEFAULT_EOW_DOMAIN.to_string()
}

/// Form submission for the user step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    #[serde(default = "default_domain")]
    pub domain: String,
    pub username: String,
    pub password: String,
}

/// One field of the user step form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
    pub options: &'static [&'static str],
}

pub const DATA_SCHEMA: [SchemaField; 3] = [
    SchemaField {
        name: CONF_DOMAIN,
        required: true,
        default: Some(DEFAULT_EOW_DOMAIN),
        options: &SUPPORTED_EOW_DOMAINS,
    },
    SchemaField {
        name: CONF_USERNAME,
        required: true,
        default: None,
        options: &[],
    },
    SchemaField {
        name: CONF_PASSWORD,
        required: true,
        default: None,
        options: &[],
    },
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unsupported domain {0}. Only 'com' and 'ca' are supported")]
    WrongDomain(String),

    #[error("cannot connect to EyeOnWater: {0}")]
    CannotConnect(#[source] eow::Error),

    #[error("invalid authentication: {0}")]
    InvalidAuth(#[source] eow::Error),

    #[error("unexpected error: {0}")]
    Unknown(#[source] eow::Error),
}

impl ValidationError {
    /// Error code shown next to the form
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::WrongDomain(_) => "wrong_domain",
            Self::CannotConnect(_) => "cannot_connect",
            Self::InvalidAuth(_) => "invalid_auth",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<eow::Error> for ValidationError {
    fn from(error: eow::Error) -> Self {
        match error {
            eow::Error::Timeout | eow::Error::Transport(_) | eow::Error::Api(_) => {
                Self::CannotConnect(error)
            }
            eow::Error::Auth(_) => Self::InvalidAuth(error),
            eow::Error::Decode(_) => Self::Unknown(error),
        }
    }
}

/// Maps the domain selector to an API hostname and unit system
pub fn create_account_from_config(data: &UserInput) -> Result<Account, ValidationError> {
    let (eow_hostname, metric_measurement_system) = match data.domain.as_str() {
        "com" => ("eyeonwater.com", false),
        "ca" => ("eyeonwater.ca", true),
        other => return Err(ValidationError::WrongDomain(other.to_string())),
    };

    Ok(Account::new(
        eow_hostname,
        data.username.clone(),
        data.password.clone(),
        metric_measurement_system,
    ))
}

/// Signs in to confirm an account's credentials
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, account: &Account) -> impl Future<Output = Result<(), eow::Error>> + Send;
}

/// Authenticates through the shared HTTP session
pub struct SessionAuthenticator {
    session: reqwest::Client,
    base_url: Option<String>,
}

impl SessionAuthenticator {
    pub fn new(session: reqwest::Client) -> Self {
        Self {
            session,
            base_url: None,
        }
    }

    /// Points every account at `base_url` instead of its regional hostname
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }
}

impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, account: &Account) -> Result<(), eow::Error> {
        let mut account = account.clone();
        if let Some(base_url) = &self.base_url {
            account = account.with_base_url(base_url.clone());
        }
        Client::new(self.session.clone(), account).authenticate().await
    }
}

/// What to store for a validated account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedInfo {
    pub title: String,
}

/// Validates that the user input allows us to connect
pub async fn validate_input<A: Authenticator>(
    authenticator: &A,
    data: &UserInput,
) -> Result<ValidatedInfo, ValidationError> {
    let account = create_account_from_config(data)?;
    authenticator.authenticate(&account).await?;
    Ok(ValidatedInfo {
        title: account.username,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    /// Show (or re-show) the form, annotated with `errors`
    Form {
        step_id: &'static str,
        data_schema: &'static [SchemaField],
        errors: BTreeMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: UserInput,
    },
    Abort {
        reason: &'static str,
    },
}

pub struct ConfigFlow<'a, A> {
    authenticator: &'a A,
    entries: &'a mut ConfigEntries,
    unique_id: Option<String>,
}

impl<'a, A: Authenticator> ConfigFlow<'a, A> {
    pub fn new(authenticator: &'a A, entries: &'a mut ConfigEntries) -> Self {
        Self {
            authenticator,
            entries,
            unique_id: None,
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Handles the initial step. `None` shows the empty form.
    pub async fn step_user(&mut self, user_input: Option<UserInput>) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(user_input) = user_input {
            match validate_input(self.authenticator, &user_input).await {
                Ok(info) => {
                    // The same account cannot be set up more than once
                    self.unique_id = Some(user_input.username.clone());
                    if self.entries.unique_id_configured(&user_input.username) {
                        return FlowResult::Abort {
                            reason: ABORT_ALREADY_CONFIGURED,
                        };
                    }

                    self.entries.add(ConfigEntry::new(
                        info.title.clone(),
                        self.unique_id.clone(),
                        user_input.clone(),
                    ));
                    return FlowResult::CreateEntry {
                        title: info.title,
                        data: user_input,
                    };
                }
                Err(err) => {
                    if let ValidationError::Unknown(source) = &err {
                        error!(error = ?source, "Unexpected exception");
                    }
                    errors.insert(ERROR_BASE.to_string(), err.error_code().to_string());
                }
            }
        }

        FlowResult::Form {
            step_id: STEP_USER,
            data_schema: &DATA_SCHEMA,
            errors,
        }
    }
}
