//! HTTP client for the remote classification service.
//!
//! The service is a separate model server speaking JSON: a `/health` probe
//! reporting whether the model is loaded, a single-text `/classify`
//! endpoint, and a `/classify/batch` endpoint for callers that can amortize
//! the round trip. A failed call or probe disables the client; it stays
//! disabled until a later health probe succeeds.

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ClassifierConfig;

/// Hard cap on the text sent per classification, in chars. Bounds model
/// latency on long article bodies.
pub const MAX_CLASSIFY_RUNES: usize = 5_000;

#[derive(Error, Debug)]
pub enum RemoteClassifierError {
    #[error("classifier request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("classifier returned status {0}")]
    BadStatus(StatusCode),

    #[error("classifier model is not loaded")]
    ModelNotLoaded,

    #[error("classification cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    original_category: String,
    original_score: f64,
    #[serde(default)]
    category_id: i32,
    #[serde(default)]
    category_name: String,
    confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    items: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
struct BatchResponseEntry {
    index: usize,
    #[serde(flatten)]
    result: ClassifyResponse,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<BatchResponseEntry>,
}

/// A classification mapped onto the internal taxonomy.
#[derive(Debug, Clone)]
pub struct RemoteClassification {
    pub original_label: String,
    pub original_score: f64,
    pub category_id: i32,
    pub category_name: String,
    pub confidence: f64,
}

pub struct RemoteClassifier {
    client: Client,
    base_url: String,
    label_map: HashMap<String, i32>,
    enabled: Mutex<bool>,
    shutdown: CancellationToken,
}

/// Join the non-empty parts with `". "` and cut at the rune budget.
fn build_text(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join(". ");
    if joined.chars().count() > MAX_CLASSIFY_RUNES {
        joined.chars().take(MAX_CLASSIFY_RUNES).collect()
    } else {
        joined
    }
}

impl RemoteClassifier {
    pub fn new(
        config: &ClassifierConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            label_map: config.category_label_to_id.clone(),
            enabled: Mutex::new(false),
            shutdown,
        })
    }

    fn set_enabled(&self, value: bool) {
        *self.enabled.lock().unwrap() = value;
    }

    pub fn enabled(&self) -> bool {
        *self.enabled.lock().unwrap()
    }

    /// Probe `/health`. Enables the client iff the model reports loaded.
    pub async fn probe_health(&self) -> Result<bool, RemoteClassifierError> {
        let url = format!("{}/health", self.base_url);
        let request = self.client.get(&url).send();
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(RemoteClassifierError::Cancelled),
            response = request => match response {
                Ok(r) => r,
                Err(e) => {
                    self.set_enabled(false);
                    return Err(e.into());
                }
            },
        };
        if !response.status().is_success() {
            self.set_enabled(false);
            return Err(RemoteClassifierError::BadStatus(response.status()));
        }
        let health: HealthResponse = response.json().await?;
        self.set_enabled(health.model_loaded);
        if health.model_loaded {
            tracing::debug!(status = %health.status, "classifier service healthy");
            Ok(true)
        } else {
            tracing::warn!(status = %health.status, "classifier model not loaded");
            Err(RemoteClassifierError::ModelNotLoaded)
        }
    }

    /// Whether the client may be used right now. A disabled client re-probes
    /// health once; it only comes back when the probe succeeds.
    pub async fn ensure_available(&self) -> bool {
        if self.enabled() {
            return true;
        }
        self.probe_health().await.is_ok()
    }

    fn map_response(&self, response: ClassifyResponse) -> RemoteClassification {
        let category_id = if response.category_id > 0 {
            response.category_id
        } else {
            self.label_map
                .get(&response.original_category.to_lowercase())
                .copied()
                .unwrap_or(0)
        };
        RemoteClassification {
            original_label: response.original_category,
            original_score: response.original_score,
            category_id,
            category_name: response.category_name,
            confidence: response.confidence,
        }
    }

    pub async fn classify(
        &self,
        title: &str,
        description: &str,
        body: &str,
    ) -> Result<RemoteClassification, RemoteClassifierError> {
        let text = build_text(&[title, description, body]);
        let url = format!("{}/classify", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&ClassifyRequest { text: &text })
            .send();
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(RemoteClassifierError::Cancelled),
            response = request => match response {
                Ok(r) => r,
                Err(e) => {
                    self.set_enabled(false);
                    return Err(e.into());
                }
            },
        };
        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "classifier call failed, disabling until next probe");
            self.set_enabled(false);
            return Err(RemoteClassifierError::BadStatus(status));
        }
        let parsed: ClassifyResponse = response.json().await?;
        Ok(self.map_response(parsed))
    }

    /// Classify a list of `(title, description)` pairs in one call. Results
    /// come back ordered by their request index.
    pub async fn classify_batch(
        &self,
        items: Vec<BatchItem>,
    ) -> Result<Vec<RemoteClassification>, RemoteClassifierError> {
        let url = format!("{}/classify/batch", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&BatchRequest { items })
            .send();
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(RemoteClassifierError::Cancelled),
            response = request => match response {
                Ok(r) => r,
                Err(e) => {
                    self.set_enabled(false);
                    return Err(e.into());
                }
            },
        };
        if !response.status().is_success() {
            let status = response.status();
            self.set_enabled(false);
            return Err(RemoteClassifierError::BadStatus(status));
        }
        let mut parsed: BatchResponse = response.json().await?;
        parsed.results.sort_by_key(|entry| entry.index);
        Ok(parsed
            .results
            .into_iter()
            .map(|entry| self.map_response(entry.result))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_text_joins_nonempty_parts() {
        assert_eq!(build_text(&["Title", "", "Body"]), "Title. Body");
        assert_eq!(build_text(&["", "", ""]), "");
    }

    #[test]
    fn test_build_text_caps_runes() {
        let long = "ж".repeat(MAX_CLASSIFY_RUNES + 100);
        let text = build_text(&["t", &long]);
        assert_eq!(text.chars().count(), MAX_CLASSIFY_RUNES);
    }
}
