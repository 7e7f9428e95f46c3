//! Long-running operation waiter
//!
//! Every mutating call returns an `Operation`. The waiter polls the operation
//! service until `done` and then yields either the typed `response` or the
//! operation error. Cancellation is the caller's: dropping the future stops
//! polling.

use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::Operation;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default delay between two polls of the same operation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls operations until they complete
#[derive(Debug, Clone)]
pub struct OperationWaiter {
    endpoint: String,
    poll_interval: Duration,
}

impl OperationWaiter {
    /// Create a waiter against the operation service endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait for the operation and return its completed form.
    ///
    /// A completed operation carrying an error becomes `CloudError::Operation`.
    pub async fn wait_done(
        &self,
        http: &HttpClient,
        mut operation: Operation,
    ) -> Result<Operation, CloudError> {
        while !operation.done {
            debug!(
                "Waiting for operation {} ({})",
                operation.id, operation.description
            );
            tokio::time::sleep(self.poll_interval).await;
            operation = http
                .get(&format!("{}/{}", self.endpoint, operation.id))
                .await?;
        }

        if let Some(status) = operation.error.take() {
            return Err(CloudError::Operation {
                id: operation.id,
                code: status.code,
                message: status.message,
            });
        }
        Ok(operation)
    }

    /// Wait for the operation and decode its response payload
    pub async fn wait<T: DeserializeOwned>(
        &self,
        http: &HttpClient,
        operation: Operation,
    ) -> Result<T, CloudError> {
        let operation = self.wait_done(http, operation).await?;
        let id = operation.id;
        let response = operation.response.ok_or_else(|| CloudError::Api {
            status: 200,
            message: format!("operation {} completed without a response", id),
        })?;
        Ok(serde_json::from_value(response)?)
    }
}
