use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Exchanges an expired access token for a fresh one
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, expired: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// Refreshes tokens against a `POST {url}` endpoint taking
/// `{"refresh_token"}` and answering `{"access_token"}`
pub struct HttpTokenRefresher {
    client: Client,
    url: String,
    refresh_token: String,
}

impl HttpTokenRefresher {
    pub fn new(url: impl Into<String>, refresh_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            refresh_token: refresh_token.into(),
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, expired: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(expired)
            .json(&RefreshRequest {
                refresh_token: &self.refresh_token,
            })
            .send()
            .await
            .map_err(|e| ClientError::Refresh(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Refresh(format!(
                "Refresh endpoint returned {}: {}",
                status, body
            )));
        }

        let result: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Refresh(format!("Failed to parse response: {}", e)))?;

        if result.access_token.is_empty() {
            return Err(ClientError::Refresh("empty access token".to_string()));
        }
        Ok(result.access_token)
    }
}
