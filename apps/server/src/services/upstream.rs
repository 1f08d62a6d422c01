//! Upstream WHO ICD-API connectivity probe
//!
//! The readiness endpoint reports whether the upstream terminology service
//! is reachable. Only the probe lives here; catalog ingestion and the full
//! OAuth client are separate one-shot tooling.

use crate::config::UpstreamConfig;
use crate::{Error, Result};
use std::time::{Duration, Instant};

pub struct WhoApiProbe {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl WhoApiProbe {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.probe_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    pub fn configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Request a client-credentials token and report the round-trip latency.
    pub async fn probe(&self) -> Result<u64> {
        if !self.configured() {
            return Err(Error::UpstreamService(
                "WHO API credentials not configured".to_string(),
            ));
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "icdapi_access"),
            ])
            .send()
            .await
            .map_err(|e| Error::UpstreamService(format!("Token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamService(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        Ok(started.elapsed().as_millis() as u64)
    }
}
