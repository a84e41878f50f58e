//! Error taxonomy shared by every component of the extension.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("{method} {path} failed: {cause}")]
    Transport {
        method: String,
        path: String,
        #[source]
        cause: reqwest::Error,
    },

    /// Honeycomb answered with a non-success status.
    #[error("{method} {path} returned {status_code} {status_text}: {response_body}")]
    Api {
        method: String,
        path: String,
        status_code: u16,
        status_text: String,
        response_body: String,
    },

    #[error("{method} {path} returned an unreadable body: {message}")]
    InvalidResponse {
        method: String,
        path: String,
        message: String,
    },

    #[error("query {query_id} (result {result_id}) did not complete within {elapsed_ms}ms")]
    PollTimeout {
        query_id: String,
        result_id: String,
        elapsed_ms: u64,
    },

    #[error("webhook secret missing or invalid")]
    Unauthenticated,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("state storage failed: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("event delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    /// True for an upstream `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status_code: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
