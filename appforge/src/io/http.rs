//! Management-API client for provider setup and provisioning.
//!
//! Bearer-token auth, JSON bodies, synchronous from the pipeline's point of
//! view. Non-2xx responses are returned as data (with the body as detail)
//! rather than transport errors so providers can apply their own policy —
//! notably the 409 find-existing fallback.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument};

/// Classified response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Success,
    /// 409: the resource already exists; callers fall back to find-existing.
    Conflict,
    Failure,
}

/// Classify an HTTP status code per the management-API contract.
pub fn classify(status: u16) -> ApiStatus {
    match status {
        200..=299 => ApiStatus::Success,
        409 => ApiStatus::Conflict,
        _ => ApiStatus::Failure,
    }
}

/// One management-API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn classify(&self) -> ApiStatus {
        classify(self.status)
    }

    /// Error detail for failure responses: the body, compacted.
    pub fn error_detail(&self) -> String {
        match &self.body {
            Value::Null => format!("status {}", self.status),
            body => format!("status {}: {body}", self.status),
        }
    }
}

/// Authenticated client for one provider's management API.
pub struct ManagementApi {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl ManagementApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    #[instrument(skip_all, fields(path))]
    pub fn get(&self, path: &str) -> Result<ApiResponse> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("GET {path}"))?;
        Self::read(response)
    }

    #[instrument(skip_all, fields(path))]
    pub fn post(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .with_context(|| format!("POST {path}"))?;
        Self::read(response)
    }

    #[instrument(skip_all, fields(path))]
    pub fn delete(&self, path: &str) -> Result<ApiResponse> {
        let response = self
            .client
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("DELETE {path}"))?;
        Self::read(response)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn read(response: reqwest::blocking::Response) -> Result<ApiResponse> {
        let status = response.status().as_u16();
        let text = response.text().context("read response body")?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        debug!(status, "management api response");
        Ok(ApiResponse { status, body })
    }
}
