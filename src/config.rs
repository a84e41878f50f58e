use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::poller::PollSettings;
use crate::verification::SecretTransport;

pub const API_KEY_ENV: &str = "HONEYCOMB_API_KEY";
pub const API_URL_ENV: &str = "HONEYCOMB_API_URL";

/// Honeycomb API key. Never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.trim().is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

/// Extension configuration, supplied by the host in the `initialize` params.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Externally reachable base URL of the webhook listener. Falls back to
    /// the locally bound address when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub secret_transport: SecretTransport,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub poll: PollSettings,
}

fn default_api_url() -> String {
    "https://api.honeycomb.io".into()
}
fn default_listen_addr() -> String {
    "127.0.0.1:0".into()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            public_url: None,
            listen_addr: default_listen_addr(),
            secret_transport: SecretTransport::default(),
            request_timeout_ms: default_request_timeout_ms(),
            poll: PollSettings::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_url", &self.api_url)
            .field("public_url", &self.public_url)
            .field("listen_addr", &self.listen_addr)
            .field("secret_transport", &self.secret_transport)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("poll", &self.poll)
            .finish()
    }
}

impl Config {
    /// Parse the `config` object of an `initialize` request. A missing or
    /// null value yields the defaults.
    pub fn from_params(value: Option<&serde_json::Value>) -> Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::Config(format!("invalid config: {e}"))),
        }
    }

    /// Fill unset fields from the process environment.
    pub fn with_env_fallback(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.api_key.is_none() {
            self.api_key = lookup(API_KEY_ENV);
        }
        if let Some(url) = lookup(API_URL_ENV) {
            if self.api_url == default_api_url() {
                self.api_url = url;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.credential()?;
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api_url must be an http(s) URL, got {}",
                self.api_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        self.poll.validate()?;
        self.secret_transport.validate()
    }

    pub fn credential(&self) -> Result<ApiCredential> {
        self.api_key
            .clone()
            .and_then(ApiCredential::new)
            .ok_or_else(|| Error::Config(format!("api_key is required (or set {API_KEY_ENV})")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_empty_object() {
        let config = Config::from_params(Some(&json!({ "api_key": "k" }))).unwrap();
        assert_eq!(config.api_url, "https://api.honeycomb.io");
        assert_eq!(config.poll.max_duration_ms, 15_000);
        assert_eq!(config.poll.poll_interval_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_credential_fails_validation() {
        let config = Config::from_params(None).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let blank = Config::from_params(Some(&json!({ "api_key": "  " }))).unwrap();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn env_fallback_only_fills_gaps() {
        let env = |name: &str| match name {
            API_KEY_ENV => Some("from-env".to_string()),
            API_URL_ENV => Some("http://localhost:9000".to_string()),
            _ => None,
        };

        let config = Config::default().with_env_fallback(env);
        assert_eq!(config.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.api_url, "http://localhost:9000");

        let explicit = Config {
            api_key: Some("explicit".into()),
            api_url: "https://api.eu1.honeycomb.io".into(),
            ..Config::default()
        }
        .with_env_fallback(env);
        assert_eq!(explicit.api_key.as_deref(), Some("explicit"));
        assert_eq!(explicit.api_url, "https://api.eu1.honeycomb.io");
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let config = Config {
            api_key: Some("super-secret".into()),
            ..Config::default()
        };
        let rendered = format!("{config:?} {:?}", config.credential().unwrap());
        assert!(!rendered.contains("super-secret"));
    }
}
