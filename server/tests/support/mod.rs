//! Shared fixtures for the end-to-end tests: an assembled engine over a
//! throwaway database, a mock inference provider, and a scripted STT
//! connector the tests drive by hand.

#![allow(dead_code)]

use async_trait::async_trait;
use scribed::config::DatabaseConfig;
use scribed::error::{Error, Result};
use scribed::events::EventBus;
use scribed::jobs::{HealthMonitor, Processor};
use scribed::providers::client::{HeartbeatSink, InferenceProvider, ProviderRegistry};
use scribed::providers::types::{AnalysisOutput, SummaryOutput, TranscriptOutput};
use scribed::storage::database::DatabaseManager;
use scribed::storage::models::JobType;
use scribed::storage::repositories::{ChunkRepository, JobRepository, SubmissionRepository};
use scribed::stream::hub::{StreamEvent, StreamHub, StreamSettings};
use scribed::stream::stt::{SttConnector, SttEvent, SttHandle, SttOptions, TranscriptSegment};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Fully wired engine over a temporary database and uploads directory
pub struct TestHarness {
    pub dir: TempDir,
    pub database: Arc<DatabaseManager>,
    pub jobs: JobRepository,
    pub submissions: SubmissionRepository,
    pub chunks: ChunkRepository,
    pub events: Arc<EventBus>,
    pub hub: Arc<StreamHub>,
    pub stt: Arc<ScriptedStt>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_settings(50, 0).await
    }

    pub async fn with_settings(max_viewers: usize, min_words_for_analysis: i64) -> Self {
        let dir = TempDir::new().unwrap();
        let database = Arc::new(
            DatabaseManager::new(&DatabaseConfig {
                path: dir.path().join("test.db"),
                max_connections: 5,
            })
            .await
            .unwrap(),
        );

        let jobs = JobRepository::new(database.pool().clone());
        let submissions = SubmissionRepository::new(database.pool().clone(), jobs.clone());
        let chunks = ChunkRepository::new(database.pool().clone());
        let events = Arc::new(EventBus::new(jobs.clone()));
        let stt = Arc::new(ScriptedStt::new());

        let hub = StreamHub::new(
            jobs.clone(),
            chunks.clone(),
            submissions.clone(),
            events.clone(),
            stt.clone(),
            StreamSettings {
                max_viewers,
                min_words_for_analysis,
                utterance_end_ms: 1500,
                sample_rate_hz: 16_000,
                uploads_dir: dir.path().join("uploads"),
            },
        );
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();

        Self {
            dir,
            database,
            jobs,
            submissions,
            chunks,
            events,
            hub,
            stt,
        }
    }

    /// A processor over this harness with the given provider set
    pub fn processor(&self, providers: ProviderRegistry, poll_ms: u64) -> Arc<Processor> {
        Processor::new(
            self.jobs.clone(),
            self.submissions.clone(),
            Arc::new(providers),
            self.events.clone(),
            self.hub.clone(),
            Duration::from_millis(poll_ms),
        )
    }

    /// A monitor over this harness; drive it with `scan_once`
    pub fn monitor(&self) -> Arc<HealthMonitor> {
        HealthMonitor::new(
            self.jobs.clone(),
            self.submissions.clone(),
            self.events.clone(),
            Duration::from_secs(3600),
        )
    }

    pub fn registry_with(&self, provider: Arc<dyn InferenceProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        registry
    }
}

/// Receive the next stream event or panic after two seconds
pub async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("stream event channel closed")
}

/// Drain whatever is immediately queued on a stream-event channel
pub async fn drain_events(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
    {
        events.push(event);
    }
    events
}

/// Configurable mock registered under the `local` tag
#[derive(Debug)]
pub struct MockProvider {
    pub transcript: String,
    pub transcript_confidence: Option<f64>,
    pub summary: String,
    pub summary_tokens: usize,
    pub analysis: AnalysisOutput,
    pub model_loaded: bool,
    /// Simulates a hung backend
    pub block: Option<Duration>,
}

impl MockProvider {
    pub fn happy() -> Self {
        Self {
            transcript: "hello world".to_string(),
            transcript_confidence: Some(0.9),
            summary: "short summary".to_string(),
            summary_tokens: 5,
            analysis: AnalysisOutput {
                topics: vec!["greetings".to_string()],
                intents: vec!["introduction".to_string()],
                summary: "A greeting.".to_string(),
                sentiment: "positive".to_string(),
            },
            model_loaded: true,
            block: None,
        }
    }

    async fn maybe_block(&self) {
        if let Some(pause) = self.block {
            tokio::time::sleep(pause).await;
        }
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn model_for(&self, job_type: JobType) -> Option<String> {
        match job_type {
            JobType::Transcribe => Some("mock-whisper".to_string()),
            _ => Some("mock-llm".to_string()),
        }
    }

    async fn transcribe(&self, _audio_path: &Path) -> Result<TranscriptOutput> {
        self.maybe_block().await;
        Ok(TranscriptOutput {
            text: self.transcript.clone(),
            confidence: self.transcript_confidence,
            model: "mock-whisper".to_string(),
            processing_time_ms: 1,
            raw_response: None,
        })
    }

    async fn summarize(&self, _text: &str) -> Result<SummaryOutput> {
        self.maybe_block().await;
        Ok(SummaryOutput {
            text: self.summary.clone(),
            model: "mock-llm".to_string(),
            tokens_used: Some(self.summary_tokens as i64),
            processing_time_ms: 1,
            raw_response: None,
        })
    }

    async fn summarize_streaming(
        &self,
        _text: &str,
        sink: Arc<dyn HeartbeatSink>,
    ) -> Result<SummaryOutput> {
        self.maybe_block().await;
        let mut partial = String::new();
        for token in 0..self.summary_tokens {
            partial.push_str("tok ");
            sink.heartbeat(token as u64 + 1, &partial).await;
        }
        Ok(SummaryOutput {
            text: self.summary.clone(),
            model: "mock-llm".to_string(),
            tokens_used: Some(self.summary_tokens as i64),
            processing_time_ms: 1,
            raw_response: None,
        })
    }

    async fn analyze(&self, _text: &str) -> Result<AnalysisOutput> {
        self.maybe_block().await;
        Ok(self.analysis.clone())
    }

    async fn is_model_loaded(&self, _model: &str) -> Result<bool> {
        Ok(self.model_loaded)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// STT connector whose event stream is fed by the test body
pub struct ScriptedStt {
    events_tx: Mutex<Option<mpsc::Sender<SttEvent>>>,
    pub received_audio: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedStt {
    pub fn new() -> Self {
        Self {
            events_tx: Mutex::new(None),
            received_audio: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push one upstream event into the open relay
    pub async fn emit(&self, event: SttEvent) {
        let tx = self
            .events_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no open STT stream");
        tx.send(event).await.expect("hub stopped reading STT events");
    }

    pub fn audio_bytes_received(&self) -> usize {
        self.received_audio.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl SttConnector for ScriptedStt {
    async fn open(&self, _options: &SttOptions) -> Result<SttHandle> {
        if self.events_tx.lock().unwrap().is_some() {
            return Err(Error::provider("stt", "scripted connector already open"));
        }
        let (events_tx, events_rx) = mpsc::channel(64);
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        *self.events_tx.lock().unwrap() = Some(events_tx);

        let store = self.received_audio.clone();
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                store.lock().unwrap().push(chunk);
            }
        });

        Ok(SttHandle {
            audio: audio_tx,
            events: events_rx,
        })
    }
}

/// Final transcript segment shorthand
pub fn final_segment(
    text: &str,
    speaker: Option<i64>,
    confidence: Option<f64>,
    start: f64,
    duration: f64,
) -> SttEvent {
    SttEvent::Segment(TranscriptSegment {
        speaker,
        text: text.to_string(),
        confidence,
        is_final: true,
        start,
        duration,
    })
}
