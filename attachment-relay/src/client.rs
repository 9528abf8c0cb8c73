use crate::config::TargetConfig;
use crate::errors::{RelayError, Result};
use crate::multipart::MultipartBody;
use async_trait::async_trait;
use hyper::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use std::time::Duration;
use url::Url;

pub const API_VERSION_HEADER: &str = "API-Version";

/// The two endpoints of the target service.
///
/// Everything above this trait is transport agnostic; tests substitute a
/// scripted implementation.
#[async_trait]
pub trait TargetService: Send + Sync {
    /// POSTs `{query, variables}` to the JSON endpoint.
    async fn query(&self, token: &str, query: &str, variables: JsonValue) -> Result<JsonValue>;

    /// POSTs a multipart body to the file endpoint.
    async fn upload(&self, token: &str, body: MultipartBody) -> Result<JsonValue>;
}

/// [`TargetService`] over HTTP.
#[derive(Clone)]
pub struct HttpTargetService {
    client: reqwest::Client,
    api_url: Url,
    file_url: Url,
    api_version: String,
}

impl HttpTargetService {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::InternalError(format!("Failed to build HTTP client: {e}")))?;

        Ok(HttpTargetService {
            client,
            api_url: config.api_url.clone(),
            file_url: config.file_url.clone(),
            api_version: config.api_version.clone(),
        })
    }

    async fn send(&self, url: &Url, request: reqwest::RequestBuilder) -> Result<JsonValue> {
        // Use host as identifier for error messages
        let endpoint = url.host_str().unwrap_or(url.as_str()).to_string();

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::UpstreamTimeout(endpoint.clone())
            } else {
                RelayError::UpstreamRequestFailed(endpoint.clone(), e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::UpstreamTimeout(endpoint.clone())
            } else {
                RelayError::ResponseBodyError(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(RelayError::UpstreamStatus {
                endpoint,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| RelayError::ResponseBodyError(e.to_string()))
    }
}

#[async_trait]
impl TargetService for HttpTargetService {
    async fn query(&self, token: &str, query: &str, variables: JsonValue) -> Result<JsonValue> {
        let request = self
            .client
            .post(self.api_url.clone())
            .header(AUTHORIZATION, token)
            .header(API_VERSION_HEADER, &self.api_version)
            .json(&serde_json::json!({ "query": query, "variables": variables }));

        self.send(&self.api_url, request).await
    }

    async fn upload(&self, token: &str, body: MultipartBody) -> Result<JsonValue> {
        let request = self
            .client
            .post(self.file_url.clone())
            .header(AUTHORIZATION, token)
            .header(API_VERSION_HEADER, &self.api_version)
            .header(CONTENT_TYPE, body.content_type())
            .header(CONTENT_LENGTH, body.content_length())
            .body(body.into_body());

        self.send(&self.file_url, request).await
    }
}
