//! Local inference provider
//!
//! Talks to two localhost daemons: a whisper-style transcription server
//! (raw audio bytes in, `{text}` out) and an Ollama-compatible LLM API for
//! summarization and chunk analysis. Summaries stream token-by-token so the
//! worker can heartbeat.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::providers::client::{HeartbeatSink, InferenceProvider};
use crate::providers::types::{AnalysisOutput, SummaryOutput, TranscriptOutput};
use crate::storage::models::JobType;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Ceiling for a single inference request, body included
const REQUEST_DEADLINE: Duration = Duration::from_secs(300);

/// A streaming generation that emits no token for this long is stalled
const STREAM_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Health probes get a much shorter deadline than inference calls
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a failed generate call is retried before giving up
#[derive(Debug, Clone)]
struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay doubles per completed attempt, smeared with up to a fifth of
    /// extra jitter
    async fn pause(&self, completed_attempts: u32) {
        let doubling = 1u32 << completed_attempts.saturating_sub(1).min(6);
        let backoff = self.base_delay.saturating_mul(doubling);
        let jitter = Duration::from_millis(fastrand::u64(0..=backoff.as_millis() as u64 / 5));
        tokio::time::sleep(backoff + jitter).await;
    }
}

/// Provider backed by localhost inference daemons
#[derive(Debug)]
pub struct LocalProvider {
    client: reqwest::Client,
    retry: RetryPolicy,
    config: ProviderConfig,
}

impl LocalProvider {
    /// Create a new local provider
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_DEADLINE)
            .user_agent(concat!("scribed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("http client setup: {e}")))?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            config,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.local_base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.config.local_base_url)
    }

    /// One-shot generation; transient failures are retried with backoff
    async fn generate_once(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.generate_url();
        let mut last_error = None;

        for attempt in 1..=self.retry.attempts {
            match self.client.post(&url).json(request).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<GenerateResponse>().await.map_err(|e| {
                        Error::provider(self.name(), format!("unreadable generate response: {e}"))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    last_error = Some(Error::provider(
                        self.name(),
                        format!("generate returned {status}: {body}"),
                    ));
                }
                Err(e) => {
                    last_error =
                        Some(Error::provider(self.name(), format!("request failed: {e}")));
                }
            }
            if attempt < self.retry.attempts {
                debug!("Retrying generate call (attempt {} failed)", attempt);
                self.retry.pause(attempt).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::provider(self.name(), "generate kept failing")))
    }
}

#[async_trait]
impl InferenceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn model_for(&self, job_type: JobType) -> Option<String> {
        match job_type {
            JobType::Transcribe => Some(self.config.transcribe_model.clone()),
            JobType::Summarize | JobType::AnalyzeChunk => {
                Some(self.config.summarize_model.clone())
            }
        }
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptOutput> {
        let started = Instant::now();

        let audio = tokio::fs::read(audio_path).await.map_err(|e| {
            Error::provider(
                self.name(),
                format!("cannot read {}: {}", audio_path.display(), e),
            )
        })?;

        debug!(
            "Sending {} bytes from {} for transcription",
            audio.len(),
            audio_path.display()
        );

        let response = self
            .client
            .post(&self.config.transcribe_url)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| Error::provider(self.name(), format!("transcribe request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                self.name(),
                format!("transcribe returned {status}: {body}"),
            ));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| Error::provider(self.name(), format!("reading transcript body: {e}")))?;
        let parsed: TranscribeResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::provider(self.name(), format!("bad transcript body: {e}")))?;

        Ok(TranscriptOutput {
            text: parsed.text,
            confidence: parsed.confidence,
            model: self.config.transcribe_model.clone(),
            processing_time_ms: started.elapsed().as_millis() as i64,
            raw_response: Some(raw),
        })
    }

    async fn summarize(&self, text: &str) -> Result<SummaryOutput> {
        let started = Instant::now();
        let request = GenerateRequest {
            model: self.config.summarize_model.clone(),
            prompt: summary_prompt(text),
            stream: false,
            format: None,
        };

        let response = self.generate_once(&request).await?;

        Ok(SummaryOutput {
            text: response.response.trim().to_string(),
            model: self.config.summarize_model.clone(),
            tokens_used: response.eval_count,
            processing_time_ms: started.elapsed().as_millis() as i64,
            raw_response: None,
        })
    }

    async fn summarize_streaming(
        &self,
        text: &str,
        sink: Arc<dyn HeartbeatSink>,
    ) -> Result<SummaryOutput> {
        let started = Instant::now();
        let request = GenerateRequest {
            model: self.config.summarize_model.clone(),
            prompt: summary_prompt(text),
            stream: true,
            format: None,
        };

        let response = self
            .client
            .post(self.generate_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider(self.name(), format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                self.name(),
                format!("generate returned {status}: {body}"),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut summary = String::new();
        let mut token_count: u64 = 0;
        let mut tokens_used = None;

        loop {
            let chunk = match tokio::time::timeout(STREAM_STALL_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    return Err(Error::provider(
                        self.name(),
                        format!("stream read failed: {e}"),
                    ));
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(Error::provider(
                        self.name(),
                        format!("streaming stalled after {token_count} tokens"),
                    ));
                }
            };

            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let piece: GenerateResponse = match serde_json::from_str(line) {
                    Ok(piece) => piece,
                    Err(e) => {
                        warn!("Skipping unparseable stream line: {}", e);
                        continue;
                    }
                };

                if !piece.response.is_empty() {
                    summary.push_str(&piece.response);
                    token_count += 1;
                    sink.heartbeat(token_count, &summary).await;
                }
                if piece.done {
                    tokens_used = piece.eval_count;
                }
            }
        }

        Ok(SummaryOutput {
            text: summary.trim().to_string(),
            model: self.config.summarize_model.clone(),
            tokens_used: tokens_used.or(Some(token_count as i64)),
            processing_time_ms: started.elapsed().as_millis() as i64,
            raw_response: None,
        })
    }

    async fn analyze(&self, text: &str) -> Result<AnalysisOutput> {
        let request = GenerateRequest {
            model: self.config.summarize_model.clone(),
            prompt: analysis_prompt(text),
            stream: false,
            format: Some("json".to_string()),
        };

        let response = self.generate_once(&request).await?;
        parse_analysis(&response.response)
            .ok_or_else(|| Error::provider(self.name(), "analysis response was not valid JSON"))
    }

    async fn is_model_loaded(&self, model: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.tags_url())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::provider(self.name(), format!("tags request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::provider(
                self.name(),
                format!("tags returned {}", response.status()),
            ));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(self.name(), format!("bad tags body: {e}")))?;

        Ok(tags.models.iter().any(|m| model_matches(&m.name, model)))
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.tags_url())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the following transcript in a few short paragraphs. \
         Capture key points, decisions, and action items.\n\n{}",
        text
    )
}

fn analysis_prompt(text: &str) -> String {
    format!(
        "Analyze the following utterance and respond with JSON containing \
         \"topics\" (array of strings), \"intents\" (array of strings), \
         \"sentiment\" (one of positive/neutral/negative), and \"summary\" \
         (one sentence).\n\nUtterance: {}",
        text
    )
}

/// Exact tag match, or base-name match ignoring the `:variant` suffix
fn model_matches(loaded: &str, wanted: &str) -> bool {
    if loaded == wanted {
        return true;
    }
    let base = |name: &str| name.split(':').next().unwrap_or(name).to_string();
    base(loaded) == base(wanted)
}

/// Parse an analysis blob, tolerating prose around the JSON object
fn parse_analysis(raw: &str) -> Option<AnalysisOutput> {
    if let Ok(parsed) = serde_json::from_str(raw) {
        return Some(parsed);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    serde_json::from_str(&raw[start..=end]).ok()
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}
