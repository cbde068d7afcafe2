// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama-backed AI classifier
//!
//! The classifier chain treats any error or empty answer from here as
//! "not classified" and moves on.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::AiClassifier;
use crate::config::AiConfig;
use crate::{Result, StowageError};

/// Ollama API client used as an [`AiClassifier`]
pub struct OllamaClassifier {
    client: Client,
    base_url: String,
    model: String,
    prompt: String,
    retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Strip `/api/...` suffixes so the configured URL can point at either the
/// server or its generate endpoint
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/')
        .replace("/api/generate", "")
        .replace("/api/chat", "")
}

/// Reduce a model reply to a single category label
pub fn clean_label(raw: &str) -> String {
    let first_line = raw.trim().lines().next().unwrap_or("").trim();

    // Drop chat prefixes like "Category: invoice"
    let mut label = match first_line.find(':') {
        Some(idx) if idx < 30 => first_line[idx + 1..].trim(),
        _ => first_line,
    }
    .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '.')
    .to_lowercase();

    label = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    while label.contains("--") {
        label = label.replace("--", "-");
    }

    label.trim_matches('-').to_string()
}

impl OllamaClassifier {
    /// Create a new Ollama classifier
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.url),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            retries: config.retries,
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                StowageError::ClassifierUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether the configured model is installed
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m.starts_with(&self.model) || m == &format!("{}:latest", self.model)))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        debug!("Sending request to Ollama: model={}", self.model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(StowageError::ClassifierUnavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }

    /// Generate with retry logic
    async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!("Retrying Ollama request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.generate(prompt.to_string()).await {
                Ok(response) => return Ok(response),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StowageError::ClassifierUnavailable("Unknown error".to_string())
        }))
    }
}

#[async_trait]
impl AiClassifier for OllamaClassifier {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn classify(&self, text: &str) -> Result<String> {
        let prompt = format!("{}\n\nFile name: {}", self.prompt, text);
        let response = self.generate_with_retry(&prompt).await?;
        Ok(clean_label(&response))
    }
}
