//! Job-lifecycle event fan-out
//!
//! Mirrors every queue transition onto subscriber sockets. The bus never
//! blocks a producer: events go through a broadcast channel and a subscriber
//! that falls too far behind simply observes a lag and drops frames.

use crate::storage::models::{Job, JobStatus, JobType, QueueStatus};
use crate::storage::repositories::JobRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;

/// How many recent jobs the initial-state frame carries
const INITIAL_STATE_JOBS: i64 = 50;

/// Broadcast channel depth before slow subscribers start lagging
const BUS_CAPACITY: usize = 256;

/// Events emitted over the job-events socket
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    InitialState {
        jobs: Vec<JobSummary>,
        status: QueueStatus,
    },
    JobCreated {
        job: JobSummary,
    },
    #[serde(rename_all = "camelCase")]
    JobClaimed {
        job_id: i64,
        job_type: JobType,
        provider: String,
        started_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    JobProgress {
        job_id: i64,
        token_count: u64,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    JobCompleted {
        job_id: i64,
        processing_time_ms: i64,
        confidence: Option<f64>,
        completed_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    JobFailed {
        job_id: i64,
        error_message: String,
        failed_at: DateTime<Utc>,
    },
    #[serde(rename = "queue_status")]
    QueueUpdate { status: QueueStatus },
}

/// Summary view of a job; bulk text bodies never cross the socket
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub provider: String,
    pub submission_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub model_used: Option<String>,
    pub confidence: Option<f64>,
    pub heartbeat_count: i64,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            provider: job.provider.clone(),
            submission_id: job.audio_file_id.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            processing_time_ms: job.processing_time_ms,
            error_message: job.error_message.clone(),
            model_used: job.model_used.clone(),
            confidence: job.confidence,
            heartbeat_count: job.heartbeat_count,
        }
    }
}

/// Fan-out bus for job lifecycle events
pub struct EventBus {
    jobs: JobRepository,
    tx: broadcast::Sender<JobEvent>,
    /// Monotonic start times for in-flight jobs, keyed by job id
    started: Mutex<HashMap<i64, Instant>>,
}

impl EventBus {
    /// Create a new event bus over the job repository
    pub fn new(jobs: JobRepository) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            jobs,
            tx,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Snapshot sent once to every new subscriber
    pub async fn initial_state(&self) -> crate::error::Result<JobEvent> {
        let jobs = self.jobs.list_recent(INITIAL_STATE_JOBS).await?;
        let status = self.jobs.queue_status().await?;
        Ok(JobEvent::InitialState {
            jobs: jobs.iter().map(JobSummary::from).collect(),
            status,
        })
    }

    /// Announce a freshly enqueued job
    pub fn job_created(&self, job: &Job) {
        self.publish(JobEvent::JobCreated {
            job: JobSummary::from(job),
        });
    }

    /// Announce a claim and start the elapsed-time clock
    pub fn job_claimed(&self, job: &Job) {
        self.started
            .lock()
            .expect("start-time map poisoned")
            .insert(job.id, Instant::now());
        self.publish(JobEvent::JobClaimed {
            job_id: job.id,
            job_type: job.job_type,
            provider: job.provider.clone(),
            started_at: job.started_at,
        });
    }

    /// Per-heartbeat progress; elapsed time comes from the claim instant
    pub fn job_progress(&self, job_id: i64, token_count: u64) {
        let elapsed_ms = self
            .started
            .lock()
            .expect("start-time map poisoned")
            .get(&job_id)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.publish(JobEvent::JobProgress {
            job_id,
            token_count,
            elapsed_ms,
        });
    }

    /// Announce completion and drop the clock entry
    pub fn job_completed(&self, job_id: i64, processing_time_ms: i64, confidence: Option<f64>) {
        self.started
            .lock()
            .expect("start-time map poisoned")
            .remove(&job_id);
        self.publish(JobEvent::JobCompleted {
            job_id,
            processing_time_ms,
            confidence,
            completed_at: Utc::now(),
        });
    }

    /// Announce failure and drop the clock entry
    pub fn job_failed(&self, job_id: i64, error_message: &str) {
        self.started
            .lock()
            .expect("start-time map poisoned")
            .remove(&job_id);
        self.publish(JobEvent::JobFailed {
            job_id,
            error_message: error_message.to_string(),
            failed_at: Utc::now(),
        });
    }

    /// Broadcast fresh queue statistics
    pub async fn broadcast_queue_status(&self) {
        match self.jobs.queue_status().await {
            Ok(status) => self.publish(JobEvent::QueueUpdate { status }),
            Err(e) => debug!("Skipping queue_status broadcast: {}", e),
        }
    }

    fn publish(&self, event: JobEvent) {
        // A send error only means no subscribers are attached
        let _ = self.tx.send(event);
    }
}
