//! Authenticated HTTP client for the Honeycomb API.
//!
//! [`ApiClient::call`] is the single request path: it attaches the team
//! header, serializes the optional JSON body, and folds every failure into
//! [`Error::Transport`] (no response) or [`Error::Api`] (non-2xx). It never
//! retries; callers own their retry policy.

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::{ApiCredential, Config};
use crate::error::{Error, Result};
use crate::types::{BatchEventStatus, Event, NewWebhookRecipient, QueryResult, Recipient};

pub const TEAM_HEADER: &str = "X-Honeycomb-Team";

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: ApiCredential,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        credential: ApiCredential,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.credential()?,
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request. Returns `None` for an empty success body.
    #[instrument(skip(self, body))]
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(TEAM_HEADER, self.credential.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|cause| Error::Transport {
            method: method.to_string(),
            path: path.to_string(),
            cause,
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|cause| Error::Transport {
            method: method.to_string(),
            path: path.to_string(),
            cause,
        })?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Honeycomb returned an error status");
            return Err(Error::Api {
                method: method.to_string(),
                path: path.to_string(),
                status_code: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                response_body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::InvalidResponse {
                method: method.to_string(),
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    /// Like [`call`](Self::call) but decodes the body into `T`; an empty
    /// body is an error here.
    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let value = self.call(method.clone(), path, body).await?;
        let value = value.ok_or_else(|| Error::InvalidResponse {
            method: method.to_string(),
            path: path.to_string(),
            message: "expected a JSON body, got none".to_string(),
        })?;
        serde_json::from_value(value).map_err(|e| Error::InvalidResponse {
            method: method.to_string(),
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// `GET /1/auth`: fails unless the credential is accepted.
    pub async fn check_auth(&self) -> Result<Value> {
        Ok(self
            .call(Method::GET, "/1/auth", None)
            .await?
            .unwrap_or(Value::Null))
    }

    pub async fn send_events(
        &self,
        dataset_slug: &str,
        events: &[Event],
    ) -> Result<Vec<BatchEventStatus>> {
        let path = format!("/1/batch/{}", path_segment(dataset_slug, "dataset_slug")?);
        let body = serde_json::to_value(events)
            .map_err(|e| Error::Validation(format!("events are not serializable: {e}")))?;
        self.call_json(Method::POST, &path, Some(&body)).await
    }

    pub async fn create_query_result(
        &self,
        dataset_slug: &str,
        query_id: &str,
    ) -> Result<QueryResult> {
        let path = format!(
            "/1/query_results/{}",
            path_segment(dataset_slug, "dataset_slug")?
        );
        let body = serde_json::json!({ "query_id": query_id });
        self.call_json(Method::POST, &path, Some(&body)).await
    }

    pub async fn get_query_result(
        &self,
        dataset_slug: &str,
        result_id: &str,
    ) -> Result<QueryResult> {
        let path = format!(
            "/1/query_results/{}/{}",
            path_segment(dataset_slug, "dataset_slug")?,
            path_segment(result_id, "result_id")?
        );
        self.call_json(Method::GET, &path, None).await
    }

    /// `POST /1/recipients`; returns the new recipient id.
    pub async fn create_webhook_recipient(&self, recipient: &NewWebhookRecipient) -> Result<String> {
        let body = serde_json::to_value(recipient)
            .map_err(|e| Error::Validation(format!("recipient is not serializable: {e}")))?;
        let created: Recipient = self
            .call_json(Method::POST, "/1/recipients", Some(&body))
            .await?;
        Ok(created.id)
    }

    pub async fn delete_recipient(&self, recipient_id: &str) -> Result<()> {
        let path = format!("/1/recipients/{}", path_segment(recipient_id, "recipient_id")?);
        self.call(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        self.call_json(Method::GET, "/1/recipients", None).await
    }
}

/// Identifiers are interpolated into the path verbatim, so reject anything
/// that would change the route.
fn path_segment<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    if value.contains(|c: char| matches!(c, '/' | '?' | '#')) {
        return Err(Error::Validation(format!(
            "{field} contains a reserved character: {value}"
        )));
    }
    Ok(value)
}
