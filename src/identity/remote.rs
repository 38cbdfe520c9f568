//! Sources for the remote mapping dataset.

use super::error::{IdentityError, Result};
use super::mapping::{parse_csv, parse_dataset, parse_legacy, MappingTable};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Where the remote mapping dataset comes from.
#[async_trait]
pub trait MappingSource: Send + Sync {
    /// Fetch the dataset once; no retries.
    async fn fetch(&self) -> Result<MappingTable>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Remote mappings disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemote;

#[async_trait]
impl MappingSource for NoRemote {
    async fn fetch(&self) -> Result<MappingTable> {
        Err(IdentityError::remote("none", "remote mappings are disabled"))
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// Fetches the dataset over HTTP. A `.csv` URL that answers 404 is retried
/// once as its `.txt` sibling.
pub struct HttpMappingSource {
    client: Client,
    url: String,
}

impl HttpMappingSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            url: url.into(),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| IdentityError::remote(url, e))
    }
}

#[async_trait]
impl MappingSource for HttpMappingSource {
    async fn fetch(&self) -> Result<MappingTable> {
        let mut url = self.url.clone();
        let mut response = self.get(&url).await?;

        if response.status() == StatusCode::NOT_FOUND && url.ends_with(".csv") {
            let txt_url = format!("{}.txt", url.trim_end_matches(".csv"));
            tracing::info!(url = %txt_url, "CSV mappings not found, trying TXT");
            response = self.get(&txt_url).await?;
            url = txt_url;
        }

        if !response.status().is_success() {
            return Err(IdentityError::remote(&url, format!("HTTP {}", response.status())));
        }

        let body = response.text().await.map_err(|e| IdentityError::remote(&url, e))?;
        let table = if url.ends_with(".csv") {
            parse_csv(&body)
        } else if url.ends_with(".txt") {
            parse_legacy(&body)
        } else {
            parse_dataset(&body)
        };

        tracing::info!(url = %url, mappings = table.len(), "Loaded remote mappings");
        Ok(table)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
