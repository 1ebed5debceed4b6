//! Bulk sync with the server of record over REST.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::auth::AuthFallbackResolver;
use crate::error::{ClientError, Result};
use crate::metrics::NotificationMetrics;

use super::store::{NotificationStore, SyncReport};
use super::types::NotificationRecord;

/// Source of notification history
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Records created at or after `since` (everything when `None`)
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NotificationRecord>>;
}

/// Accepts either a bare array or `{"notifications": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SyncResponse {
    List(Vec<NotificationRecord>),
    Wrapped { notifications: Vec<NotificationRecord> },
}

impl SyncResponse {
    fn into_records(self) -> Vec<NotificationRecord> {
        match self {
            SyncResponse::List(records) => records,
            SyncResponse::Wrapped { notifications } => notifications,
        }
    }
}

/// `GET {url}?since=<ms>` with the session's bearer token
pub struct HttpNotificationSource {
    client: Client,
    url: Url,
    resolver: Arc<AuthFallbackResolver>,
}

impl HttpNotificationSource {
    pub fn new(url: &str, resolver: Arc<AuthFallbackResolver>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ClientError::Config(format!("Invalid sync URL {}: {}", url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            resolver,
        })
    }
}

#[async_trait]
impl NotificationSource for HttpNotificationSource {
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NotificationRecord>> {
        let mut url = self.url.clone();
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.timestamp_millis().to_string());
        }

        let mut request = self.client.get(url);
        if let Some(token) = self.resolver.token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Sync(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Sync(format!(
                "Sync endpoint returned {}: {}",
                status, body
            )));
        }

        let result: SyncResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Sync(format!("Failed to parse response: {}", e)))?;
        Ok(result.into_records())
    }
}

/// Pulls missed notifications into the store
pub struct NotificationSync {
    source: Arc<dyn NotificationSource>,
    store: Arc<NotificationStore>,
}

impl NotificationSync {
    pub fn new(source: Arc<dyn NotificationSource>, store: Arc<NotificationStore>) -> Self {
        Self { source, store }
    }

    /// Fetch everything since the newest stored record and merge it
    pub async fn run(&self) -> Result<SyncReport> {
        let since = self.store.newest_created_at();
        match self.source.fetch_since(since).await {
            Ok(records) => {
                let fetched = records.len();
                let report = self.store.merge(records);
                NotificationMetrics::record_sync("ok");
                tracing::info!(
                    fetched,
                    inserted = report.inserted,
                    marked_read = report.marked_read,
                    "Notification sync completed"
                );
                Ok(report)
            }
            Err(error) => {
                NotificationMetrics::record_sync("error");
                tracing::warn!(error = %error, "Notification sync failed");
                Err(error)
            }
        }
    }
}
