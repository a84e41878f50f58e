//! Bounded short-poll loop around Honeycomb query results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::types::{QueryHandle, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_duration_ms() -> u64 {
    15_000
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PollSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_duration_ms == 0 || self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll.max_duration_ms and poll.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// The two query-result calls the poll loop needs.
#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn create_query_result(&self, dataset_slug: &str, query_id: &str) -> Result<QueryResult>;
    async fn get_query_result(&self, dataset_slug: &str, result_id: &str) -> Result<QueryResult>;
}

#[async_trait]
impl QueryApi for ApiClient {
    async fn create_query_result(&self, dataset_slug: &str, query_id: &str) -> Result<QueryResult> {
        ApiClient::create_query_result(self, dataset_slug, query_id).await
    }

    async fn get_query_result(&self, dataset_slug: &str, result_id: &str) -> Result<QueryResult> {
        ApiClient::get_query_result(self, dataset_slug, result_id).await
    }
}

pub struct QueryRunner<A> {
    api: A,
    settings: PollSettings,
}

impl<A: QueryApi> QueryRunner<A> {
    pub fn new(api: A, settings: PollSettings) -> Self {
        Self { api, settings }
    }

    /// Submit the query, then re-check the result every `poll_interval`
    /// until it completes or `max_duration` has elapsed.
    ///
    /// The submission is not retried. The deadline is checked both before
    /// and after every wait, and a wait never runs past the deadline.
    #[instrument(skip(self), fields(query_id = %handle.query_id, dataset = %handle.dataset_slug))]
    pub async fn run_query(&self, handle: &QueryHandle) -> Result<QueryResult> {
        let submitted = self
            .api
            .create_query_result(&handle.dataset_slug, &handle.query_id)
            .await?;
        let result_id = submitted.id;

        let max_duration = self.settings.max_duration();
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = self
                .api
                .get_query_result(&handle.dataset_slug, &result_id)
                .await?;
            if result.complete {
                info!(
                    %result_id,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query result complete"
                );
                return Ok(result);
            }

            let elapsed = started.elapsed();
            if elapsed >= max_duration {
                return Err(self.timed_out(handle, &result_id, elapsed));
            }

            debug!(%result_id, attempts, "Query result not complete yet");
            sleep(self.settings.poll_interval().min(max_duration - elapsed)).await;

            let elapsed = started.elapsed();
            if elapsed >= max_duration {
                return Err(self.timed_out(handle, &result_id, elapsed));
            }
        }
    }

    fn timed_out(&self, handle: &QueryHandle, result_id: &str, elapsed: Duration) -> Error {
        let elapsed_ms = elapsed.as_millis() as u64;
        warn!(%result_id, elapsed_ms, "Query result polling timed out");
        Error::PollTimeout {
            query_id: handle.query_id.clone(),
            result_id: result_id.to_string(),
            elapsed_ms,
        }
    }
}
