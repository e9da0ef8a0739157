//! Serial inference worker
//!
//! One cooperative loop: claim the queue head, dispatch by job type, record
//! the terminal state, repeat. At most one provider call is ever in flight,
//! enforced by a local mutex on top of the database's atomic claim.

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::providers::client::{HeartbeatSink, InferenceProvider, ProviderRegistry};
use crate::storage::models::{
    CreateSummarizeJob, Job, JobOutcome, JobType, SubmissionStatus,
};
use crate::storage::repositories::{JobRepository, SubmissionRepository};
use crate::stream::hub::StreamHub;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The serial job worker
pub struct Processor {
    jobs: JobRepository,
    submissions: SubmissionRepository,
    providers: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    hub: Arc<StreamHub>,
    poll_interval: Duration,
    /// Belt-and-braces serialization next to the atomic claim
    busy: AsyncMutex<()>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    /// Create a new processor; call `start` to begin polling
    pub fn new(
        jobs: JobRepository,
        submissions: SubmissionRepository,
        providers: Arc<ProviderRegistry>,
        events: Arc<EventBus>,
        hub: Arc<StreamHub>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            jobs,
            submissions,
            providers,
            events,
            hub,
            poll_interval,
            busy: AsyncMutex::new(()),
            shutdown,
            handle: Mutex::new(None),
        })
    }

    /// Spawn the worker loop
    pub fn start(self: &Arc<Self>) {
        let processor = self.clone();
        let handle = tokio::spawn(async move { processor.run().await });
        *self.handle.lock().expect("processor handle poisoned") = Some(handle);
        info!(
            "Processor started (poll interval {}ms)",
            self.poll_interval.as_millis()
        );
    }

    /// Drain: stop polling and wait for the in-flight job, if any.
    /// Provider calls are never cancelled mid-flight.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("processor handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Processor stopped");
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.jobs.claim_next().await {
                        Ok(Some(job)) => self.process(job).await,
                        Ok(None) => {}
                        Err(e) => error!("Claim attempt failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("Processor draining");
                    break;
                }
            }
        }
    }

    /// Dispatch one claimed job to its handler and settle the outcome
    async fn process(&self, job: Job) {
        let _busy = self.busy.lock().await;

        info!("Processing job {} ({})", job.id, job.job_type);
        self.events.job_claimed(&job);

        if let Some(submission_id) = job.audio_file_id.as_deref() {
            let status = match job.job_type {
                JobType::Transcribe => Some(SubmissionStatus::Transcribing),
                JobType::Summarize => Some(SubmissionStatus::Summarizing),
                JobType::AnalyzeChunk => None,
            };
            if let Some(status) = status {
                if let Err(e) = self.submissions.update_status(submission_id, status, None).await {
                    warn!("Could not update submission {}: {}", submission_id, e);
                }
            }
        }

        let result = match job.job_type {
            JobType::Transcribe => self.run_transcribe(&job).await,
            JobType::Summarize => self.run_summarize(&job).await,
            JobType::AnalyzeChunk => self.run_analyze(&job).await,
        };

        if let Err(e) = result {
            self.fail_job(&job, &e.to_string()).await;
        }
        self.events.broadcast_queue_status().await;
    }

    async fn run_transcribe(&self, job: &Job) -> Result<()> {
        let path = job
            .input_file_path
            .as_deref()
            .ok_or_else(|| Error::invalid_input("transcribe job has no input file"))?;
        let provider = self.providers.resolve(&job.provider)?;

        if provider.is_local() {
            if let Some(model) = provider.model_for(JobType::Transcribe) {
                if !provider.is_model_loaded(&model).await? {
                    return Err(Error::provider(
                        provider.name(),
                        format!("model '{}' is not loaded; load it before transcribing", model),
                    ));
                }
                self.jobs.mark_model_verified(job.id).await?;
            }
        }

        let started = Instant::now();
        let output = self
            .with_timeout(job, provider.transcribe(std::path::Path::new(path)))
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let applied = self
            .jobs
            .complete(
                job.id,
                JobOutcome {
                    output_text: output.text.clone(),
                    model_used: output.model,
                    processing_time_ms: elapsed_ms,
                    confidence: output.confidence,
                    raw_response: output.raw_response,
                    raw_response_type: Some("json".to_string()),
                },
            )
            .await?;
        if !applied {
            // Someone else finalized this job; nothing more to do
            return Ok(());
        }
        self.events.job_completed(job.id, elapsed_ms, output.confidence);

        if job.auto_summarize() && !output.text.trim().is_empty() {
            let summarize = self
                .jobs
                .create_summarize(CreateSummarizeJob {
                    text: output.text,
                    submission_id: job.audio_file_id.clone(),
                    metadata: None,
                    provider: job.provider.clone(),
                    timeout_seconds: None,
                })
                .await?;
            debug!(
                "Auto-chained summarize job {} from transcribe job {}",
                summarize.id, job.id
            );
            self.events.job_created(&summarize);
        } else if let Some(submission_id) = job.audio_file_id.as_deref() {
            self.submissions
                .update_status(submission_id, SubmissionStatus::Completed, None)
                .await?;
        }

        Ok(())
    }

    async fn run_summarize(&self, job: &Job) -> Result<()> {
        let text = job
            .input_text
            .clone()
            .ok_or_else(|| Error::invalid_input("summarize job has no input text"))?;
        let provider = self.providers.resolve(&job.provider)?;

        let sink: Arc<dyn HeartbeatSink> = Arc::new(JobHeartbeat {
            jobs: self.jobs.clone(),
            events: self.events.clone(),
            job_id: job.id,
        });

        let started = Instant::now();
        let output = self
            .with_timeout(job, summarize_with(provider.as_ref(), &text, sink))
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let applied = self
            .jobs
            .complete(
                job.id,
                JobOutcome {
                    output_text: output.text,
                    model_used: output.model,
                    processing_time_ms: elapsed_ms,
                    confidence: None,
                    raw_response: output.raw_response,
                    raw_response_type: Some("json".to_string()),
                },
            )
            .await?;
        if !applied {
            return Ok(());
        }
        self.events.job_completed(job.id, elapsed_ms, None);

        if let Some(submission_id) = job.audio_file_id.as_deref() {
            self.submissions
                .update_status(submission_id, SubmissionStatus::Completed, None)
                .await?;
        }

        Ok(())
    }

    async fn run_analyze(&self, job: &Job) -> Result<()> {
        let text = job
            .input_text
            .clone()
            .ok_or_else(|| Error::invalid_input("analysis job has no input text"))?;
        let provider = self.providers.resolve(&job.provider)?;

        let started = Instant::now();
        let analysis = self.with_timeout(job, provider.analyze(&text)).await?;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let applied = self
            .jobs
            .complete(
                job.id,
                JobOutcome {
                    output_text: serde_json::to_string(&analysis)?,
                    model_used: provider
                        .model_for(JobType::AnalyzeChunk)
                        .unwrap_or_else(|| provider.name().to_string()),
                    processing_time_ms: elapsed_ms,
                    confidence: None,
                    raw_response: None,
                    raw_response_type: None,
                },
            )
            .await?;
        if !applied {
            return Ok(());
        }
        self.events.job_completed(job.id, elapsed_ms, None);

        let metadata = job.metadata_value();
        match (
            metadata.get("sessionId").and_then(|v| v.as_str()),
            metadata.get("chunkId").and_then(|v| v.as_i64()),
        ) {
            (Some(session_id), Some(chunk_id)) => {
                self.hub.broadcast_chunk_analyzed(session_id, chunk_id, &analysis);
            }
            _ => warn!("Analysis job {} has no session/chunk metadata", job.id),
        }

        Ok(())
    }

    /// Wrap a provider call in the job's timeout
    async fn with_timeout<T>(
        &self,
        job: &Job,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::provider(
                job.provider.clone(),
                format!("call timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    /// Record a failure and propagate it to the linked submission
    async fn fail_job(&self, job: &Job, message: &str) {
        error!("Job {} failed: {}", job.id, message);
        match self.jobs.fail(job.id, message).await {
            Ok(true) => {
                self.events.job_failed(job.id, message);
                if let Some(submission_id) = job.audio_file_id.as_deref() {
                    if let Err(e) = self.submissions.fail_if_active(submission_id, message).await {
                        warn!("Could not propagate failure to {}: {}", submission_id, e);
                    }
                }
            }
            Ok(false) => {}
            Err(e) => error!("Failed to record failure for job {}: {}", job.id, e),
        }
    }
}

/// Streaming providers get the token stream; the rest complete in one shot
async fn summarize_with(
    provider: &dyn InferenceProvider,
    text: &str,
    sink: Arc<dyn HeartbeatSink>,
) -> Result<crate::providers::types::SummaryOutput> {
    if provider.is_local() {
        provider.summarize_streaming(text, sink).await
    } else {
        provider.summarize(text).await
    }
}

/// Heartbeat sink that refreshes the job row and mirrors progress onto the
/// event bus
struct JobHeartbeat {
    jobs: JobRepository,
    events: Arc<EventBus>,
    job_id: i64,
}

#[async_trait]
impl HeartbeatSink for JobHeartbeat {
    async fn heartbeat(&self, token_count: u64, _partial_text: &str) {
        if let Err(e) = self.jobs.heartbeat(self.job_id, token_count).await {
            warn!("Heartbeat update for job {} failed: {}", self.job_id, e);
        }
        self.events.job_progress(self.job_id, token_count);
    }
}
