//! Stuck-job detection and recovery
//!
//! Runs beside the processor at a coarser cadence. A `processing` job whose
//! heartbeat (or start time, if it never beat) is older than its timeout is
//! forced to `failed`; the processor's own late complete/fail calls then
//! no-op against the status guard.

use crate::error::Result;
use crate::events::EventBus;
use crate::storage::models::Job;
use crate::storage::repositories::{JobRepository, SubmissionRepository};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Background monitor recovering jobs that stopped making progress
pub struct HealthMonitor {
    jobs: JobRepository,
    submissions: SubmissionRepository,
    events: Arc<EventBus>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a new monitor; call `start` to begin scanning
    pub fn new(
        jobs: JobRepository,
        submissions: SubmissionRepository,
        events: Arc<EventBus>,
        interval: Duration,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            jobs,
            submissions,
            events,
            interval,
            shutdown,
            handle: Mutex::new(None),
        })
    }

    /// Spawn the scan loop.
    ///
    /// Begins with a startup pass: a fresh process cannot own any claim, so
    /// every job still in `processing` is an orphan from a previous run and
    /// is failed immediately rather than after its timeout elapses.
    pub fn start(self: &Arc<Self>) {
        let monitor = self.clone();
        let handle = tokio::spawn(async move { monitor.run().await });
        *self.handle.lock().expect("monitor handle poisoned") = Some(handle);
        info!(
            "Health monitor started (scan interval {}ms)",
            self.interval.as_millis()
        );
    }

    /// Stop the scan loop
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("monitor handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Health monitor stopped");
    }

    async fn run(self: Arc<Self>) {
        match self.recover_interrupted().await {
            Ok(0) => {}
            Ok(count) => warn!("Recovered {} jobs interrupted by restart", count),
            Err(e) => error!("Startup recovery pass failed: {}", e),
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the startup pass
        // is not immediately followed by a redundant scan
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!("Stuck-job scan failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    }

    /// One scan: fail every stuck job with a reason-coded message.
    /// Returns how many jobs were recovered.
    pub async fn scan_once(&self) -> Result<usize> {
        let stuck = self.jobs.stuck_jobs().await?;
        let count = stuck.len();
        for job in &stuck {
            self.recover(job, stuck_reason(job)).await;
        }
        Ok(count)
    }

    /// Fail every job left in `processing`, regardless of age
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let orphans = self.jobs.processing_jobs().await?;
        let count = orphans.len();
        for job in &orphans {
            self.recover(
                job,
                "Job interrupted by service restart before completion".to_string(),
            )
            .await;
        }
        Ok(count)
    }

    async fn recover(&self, job: &Job, reason: String) {
        warn!("Recovering stuck job {}: {}", job.id, reason);
        match self.jobs.fail(job.id, &reason).await {
            Ok(true) => {
                self.events.job_failed(job.id, &reason);
                if let Some(submission_id) = job.audio_file_id.as_deref() {
                    if let Err(e) = self.submissions.fail_if_active(submission_id, &reason).await {
                        error!("Could not propagate failure to {}: {}", submission_id, e);
                    }
                }
            }
            // Finalized by someone else between the scan and the update
            Ok(false) => {}
            Err(e) => error!("Failed to recover job {}: {}", job.id, e),
        }
    }
}

/// Reason string derived from how far the job got before stalling
fn stuck_reason(job: &Job) -> String {
    match job.last_heartbeat {
        None if !job.model_verified => {
            "Job started but model was never verified as loaded".to_string()
        }
        None => "Job started but never received any tokens".to_string(),
        Some(_) => format!("Job stalled after receiving {} tokens", job.heartbeat_count),
    }
}
