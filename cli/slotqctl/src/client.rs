//! HTTP client for API communication.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::error::CliError;

/// API client for communicating with the allocation service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client from config.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url().trim_end_matches('/').to_string(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;

        self.handle_response(response).await
    }

    /// Make a POST request with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;

        self.handle_response(response).await
    }

    /// Make a POST request with no body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).send().await?;

        self.handle_response(response).await
    }

    /// Handle a successful or error response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    /// Handle an error response.
    ///
    /// The API serves RFC 7807 problem documents; fall back to a generic
    /// error when the body is not one.
    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status().as_u16();

        let problem: ProblemResponse = response.json().await.unwrap_or_else(|_| ProblemResponse {
            code: "unknown".to_string(),
            detail: "Unknown error".to_string(),
            request_id: None,
        });

        Err(CliError::api(
            status,
            problem.code,
            problem.detail,
            problem.request_id,
        ))
    }
}

/// The subset of the API's problem document the CLI cares about.
#[derive(Debug, Deserialize)]
struct ProblemResponse {
    code: String,
    detail: String,
    #[serde(default)]
    request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let config = Config::default();
        let client = ApiClient::new(&config).unwrap();
        assert!(client.url("/v1/owners").contains("/v1/owners"));
    }

    #[test]
    fn test_problem_response_parsing() {
        let json = r#"{
            "type": "https://slotq.dev/problems/already_cancelled",
            "title": "Conflict",
            "status": 409,
            "detail": "token tok_x is already cancelled",
            "code": "already_cancelled",
            "request_id": "req_123",
            "retryable": false
        }"#;
        let problem: ProblemResponse = serde_json::from_str(json).unwrap();
        assert_eq!(problem.code, "already_cancelled");
        assert_eq!(problem.request_id.as_deref(), Some("req_123"));
    }
}
