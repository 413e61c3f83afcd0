use std::fmt;

/// Credentials and regional settings for one EyeOnWater account
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub eow_hostname: String,
    pub username: String,
    pub password: String,
    pub metric_measurement_system: bool,
    base_url: Option<String>,
}

impl Account {
    pub fn new(
        eow_hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        metric_measurement_system: bool,
    ) -> Self {
        Self {
            eow_hostname: eow_hostname.into(),
            username: username.into(),
            password: password.into(),
            metric_measurement_system,
            base_url: None,
        }
    }

    /// Sends requests to `base_url` instead of `https://<eow_hostname>`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}", self.eow_hostname),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("eow_hostname", &self.eow_hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("metric_measurement_system", &self.metric_measurement_system)
            .field("base_url", &self.base_url)
            .finish()
    }
}
