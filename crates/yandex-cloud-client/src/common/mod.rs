//! Common utilities for the Yandex Cloud API client
//!
//! Provides the authenticated HTTP wrapper shared by every service endpoint,
//! the token source and the long-running operation waiter.

pub mod auth;
pub mod operation;

use crate::error::{CODE_ALREADY_EXISTS, CODE_NOT_FOUND, CloudError};
use crate::models::{ListPage, OperationStatus};
use auth::TokenSource;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

/// HTTP client wrapper with IAM authentication
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    tokens: TokenSource,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, tokens: TokenSource) -> Self {
        Self { client, tokens }
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get authorization header value
    pub async fn auth_header(&self) -> Result<String, CloudError> {
        Ok(format!("Bearer {}", self.tokens.token().await?))
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, CloudError> {
        Ok(request
            .header("Authorization", self.auth_header().await?)
            .header("Accept", "application/json")
            .header("X-Request-Id", Uuid::new_v4().to_string()))
    }

    /// Fetch all pages of a list response, following `nextPageToken`
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<T>, CloudError> {
        let mut all_results = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = filters.to_vec();
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page_url = format!("{}?{}", url, self.build_query_string(&query));
            debug!("Fetching page: {}", page_url);

            let page: ListPage<T> = self.get(&page_url).await?;
            all_results.extend(page.items);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(all_results)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        debug!("GET {}", url);

        let response = self
            .authorized(self.client.get(url))
            .await?
            .send()
            .await
            .map_err(CloudError::Http)?;

        let response = check_status("GET", url, response).await?;
        decode(url, response).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        debug!("POST {} with body: {}", url, body);

        let response = self
            .authorized(self.client.post(url))
            .await?
            .json(body)
            .send()
            .await
            .map_err(CloudError::Http)?;

        let response = check_status("POST", url, response).await?;
        decode(url, response).await
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        debug!("PATCH {} with body: {}", url, body);

        let response = self
            .authorized(self.client.patch(url))
            .await?
            .json(body)
            .send()
            .await
            .map_err(CloudError::Http)?;

        let response = check_status("PATCH", url, response).await?;
        decode(url, response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        debug!("DELETE {}", url);

        let response = self
            .authorized(self.client.delete(url))
            .await?
            .send()
            .await
            .map_err(CloudError::Http)?;

        let response = check_status("DELETE", url, response).await?;
        decode(url, response).await
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Map a non-success response onto the error taxonomy.
///
/// The API reports a `google.rpc.Status` body; its code wins over the HTTP
/// status because several gRPC codes share one HTTP status.
async fn check_status(method: &str, url: &str, response: Response) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let rpc_status = serde_json::from_str::<OperationStatus>(&body).ok();
    let message = rpc_status
        .as_ref()
        .map_or_else(|| body.clone(), |s| s.message.clone());

    match (status, rpc_status.map(|s| s.code)) {
        (_, Some(CODE_NOT_FOUND)) | (StatusCode::NOT_FOUND, _) => Err(CloudError::NotFound(
            format!("{} {}: {}", method, url, message),
        )),
        (_, Some(CODE_ALREADY_EXISTS)) => Err(CloudError::AlreadyExists(format!(
            "{} {}: {}",
            method, url, message
        ))),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => Err(CloudError::Authentication(
            format!("{} {} failed: {} - {}", method, url, status, message),
        )),
        _ => Err(CloudError::Api {
            status: status.as_u16(),
            message: format!("{} {} failed: {}", method, url, message),
        }),
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, CloudError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| CloudError::Api {
        status: 200,
        message: format!(
            "error decoding response body from {}: {} - Response (first 500 chars): {}",
            url,
            e,
            text.chars().take(500).collect::<String>()
        ),
    })
}
