//! Spreadsheet bridge sink
//!
//! HTTP client for the spreadsheet bridge service. One POST per event;
//! the worker in `mirror` handles retries, so this sink only reports
//! whether a single delivery attempt succeeded.

use super::{MirrorEvent, MirrorSink};
use crate::error::EngineError;
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct SheetsMirror {
    client: Client,
    base_url: String,
    service_token: Option<String>,
}

impl SheetsMirror {
    pub fn new(base_url: &str, service_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                EngineError::ExternalSync(format!("Failed to build mirror HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token,
        })
    }
}

#[async_trait::async_trait]
impl MirrorSink for SheetsMirror {
    async fn deliver(&self, event: &MirrorEvent) -> Result<()> {
        let url = format!("{}/api/v1/mirror/events", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(event);

        if let Some(token) = &self.service_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            EngineError::ExternalSync(format!("Mirror request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalSync(format!(
                "Mirror bridge returned {}: {}",
                status, body
            )));
        }

        debug!("Mirrored event to spreadsheet bridge");
        Ok(())
    }
}
