use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Bytes of entropy in a generated webhook secret (hex-encoded to twice that).
pub const SECRET_BYTES: usize = 32;

/// Where an inbound webhook request carries the shared secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretTransport {
    /// `?<name>=<secret>` on the callback URL registered with Honeycomb.
    Query {
        #[serde(default = "default_query_param")]
        name: String,
    },
    /// A request header; Honeycomb sends the recipient's `webhook_secret`
    /// as `X-Honeycomb-Webhook-Token`.
    Header {
        #[serde(default = "default_header_name")]
        name: String,
    },
}

fn default_query_param() -> String {
    "secret".into()
}
fn default_header_name() -> String {
    "X-Honeycomb-Webhook-Token".into()
}

impl Default for SecretTransport {
    fn default() -> Self {
        SecretTransport::Query {
            name: default_query_param(),
        }
    }
}

impl SecretTransport {
    pub fn validate(&self) -> Result<()> {
        let name = match self {
            SecretTransport::Query { name } | SecretTransport::Header { name } => name,
        };
        if name.trim().is_empty() {
            return Err(Error::Config("secret_transport name must not be empty".into()));
        }
        Ok(())
    }

    /// Pull the presented secret out of a request, if there is one.
    pub fn extract(&self, headers: &HeaderMap, uri: &Uri) -> Option<String> {
        match self {
            SecretTransport::Query { name } => {
                let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
                params.get(name).cloned()
            }
            SecretTransport::Header { name } => headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    /// URL to register with Honeycomb for `endpoint`. Only the query
    /// transport embeds the secret; secrets are hex so need no escaping.
    pub fn callback_url(&self, endpoint: &str, secret: &str) -> String {
        match self {
            SecretTransport::Query { name } => {
                let sep = if endpoint.contains('?') { '&' } else { '?' };
                format!("{endpoint}{sep}{name}={secret}")
            }
            SecretTransport::Header { .. } => endpoint.to_string(),
        }
    }
}

/// Fail-closed check of a presented secret against the stored one. The
/// secret is a bearer capability: no timestamp or replay window applies.
pub fn authenticate(presented: Option<&str>, stored: Option<&str>) -> Result<()> {
    match (presented, stored) {
        (Some(presented), Some(stored)) if !presented.is_empty() && !stored.is_empty() => {
            if bool::from(presented.as_bytes().ct_eq(stored.as_bytes())) {
                Ok(())
            } else {
                Err(Error::Unauthenticated)
            }
        }
        _ => Err(Error::Unauthenticated),
    }
}

/// Fresh random webhook secret from the OS CSPRNG, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
