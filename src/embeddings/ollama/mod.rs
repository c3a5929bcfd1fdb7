
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::PerfError;
use crate::config::OllamaConfig;
use crate::embeddings::Embedder;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1024;

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Subset of the `/api/tags` listing that names the pulled models
#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<PulledModel>,
}

#[derive(Debug, Deserialize)]
struct PulledModel {
    name: String,
}

/// What to do after a failed HTTP attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Retry,
    GiveUp,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay multiplied by the backoff factor between attempts
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fail unless the server answers and has the configured model pulled.
    ///
    /// A model configured without a tag also matches its `:latest` tag.
    #[inline]
    pub fn ensure_model_available(&self) -> Result<()> {
        let url = self.endpoint("/api/tags")?;
        debug!("Checking Ollama at {} for model {}", self.base_url, self.model);

        let body = self
            .call_with_retry("model listing", || {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("Ollama at {} is not reachable", self.base_url))?;
        let tags: TagsResponse =
            serde_json::from_str(&body).context("Unexpected /api/tags payload")?;

        let pulled: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
        if pulled.iter().any(|name| self.matches_model(name)) {
            info!("Ollama at {} serves model {}", self.base_url, self.model);
            return Ok(());
        }

        warn!("Model {} missing from Ollama; pulled: {:?}", self.model, pulled);
        Err(anyhow::anyhow!(
            "Ollama has no model '{}' (pulled: {}); run `ollama pull {}`",
            self.model,
            if pulled.is_empty() { "none".to_string() } else { pulled.join(", ") },
            self.model
        ))
    }

    fn matches_model(&self, name: &str) -> bool {
        name == self.model
            || (!self.model.contains(':')
                && name.strip_suffix(":latest") == Some(self.model.as_str()))
    }

    fn endpoint(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route)
            .with_context(|| format!("Invalid Ollama endpoint {}{}", self.base_url, route))
    }

    /// Embed texts in requests of at most `batch_size` inputs each.
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let batch = self
                .embed_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let url = self.endpoint("/api/embed")?;
        let request_json =
            serde_json::to_string(&request).context("Failed to encode embed request")?;

        let response_text = self
            .call_with_retry("embed request", || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .with_context(|| format!("Ollama could not embed with model {}", self.model))?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Unexpected /api/embed payload")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: sent {} texts, got {} vectors",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// Run `send` until it succeeds, a non-transient error occurs or the
    /// attempts run out.
    fn call_with_retry<F>(&self, label: &str, mut send: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut attempt = 1;
        loop {
            let error = match send() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if classify(&error) == Attempt::GiveUp {
                warn!("Ollama {} failed permanently: {}", label, error);
                return Err(anyhow::anyhow!("{} rejected: {}", label, error));
            }
            if attempt >= self.retry_attempts {
                error!(
                    "Ollama {} failed after {} attempts: {}",
                    label, attempt, error
                );
                return Err(anyhow::anyhow!(
                    "{} failed after {} attempts: {}",
                    label,
                    attempt,
                    error
                ));
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                "Ollama {} attempt {}/{} failed ({}), retrying in {:?}",
                label, attempt, self.retry_attempts, error, delay
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Delay after the given failed attempt, doubling from `backoff_unit`
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Server errors and transport failures are transient; anything else is not.
fn classify(error: &ureq::Error) -> Attempt {
    match error {
        ureq::Error::StatusCode(status) if *status >= 500 => Attempt::Retry,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => Attempt::Retry,
        _ => Attempt::GiveUp,
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || client.generate_embeddings(&texts))
            .await
            .map_err(|e| PerfError::Embedding(format!("Embedding task failed: {e}")))?
            .map_err(|e| PerfError::Embedding(format!("{e:#}")))
    }
}
