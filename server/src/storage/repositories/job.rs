//! Job repository: queue CRUD, atomic claim, guarded terminal transitions

use crate::error::{Error, Result};
use crate::storage::database::DatabasePool;
use crate::storage::models::{
    CreateSummarizeJob, CreateTranscribeJob, Job, JobOutcome, JobStatus, QueueStatus, StreamChunk,
};
use sqlx::Row;
use tracing::{debug, info, warn};

/// Repository for job queue operations
#[derive(Clone)]
pub struct JobRepository {
    pool: DatabasePool,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Enqueue a transcription job
    pub async fn create_transcribe(&self, input: CreateTranscribeJob) -> Result<Job> {
        let metadata = encode_metadata(input.metadata)?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (job_type, status, provider, input_file_path, audio_file_id, metadata, timeout_seconds)
            VALUES ('transcribe', 'pending', ?, ?, ?, ?, COALESCE(?, 300))
            RETURNING *
            "#,
        )
        .bind(&input.provider)
        .bind(&input.audio_path)
        .bind(&input.submission_id)
        .bind(&metadata)
        .bind(input.timeout_seconds)
        .fetch_one(&self.pool)
        .await?;

        info!("Created transcribe job {} for {}", job.id, input.audio_path);
        Ok(job)
    }

    /// Enqueue a summarization job; the input text must be non-empty
    pub async fn create_summarize(&self, input: CreateSummarizeJob) -> Result<Job> {
        if input.text.trim().is_empty() {
            return Err(Error::invalid_input("summarize job requires non-empty text"));
        }
        let metadata = encode_metadata(input.metadata)?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (job_type, status, provider, input_text, audio_file_id, metadata, timeout_seconds)
            VALUES ('summarize', 'pending', ?, ?, ?, ?, COALESCE(?, 300))
            RETURNING *
            "#,
        )
        .bind(&input.provider)
        .bind(&input.text)
        .bind(&input.submission_id)
        .bind(&metadata)
        .bind(input.timeout_seconds)
        .fetch_one(&self.pool)
        .await?;

        info!("Created summarize job {}", job.id);
        Ok(job)
    }

    /// Enqueue a chunk-analysis job and atomically link it to the chunk.
    ///
    /// Validation ladder: the chunk must exist and carry a non-blank
    /// transcript; a live or completed prior analysis job is a conflict,
    /// while a failed one is replaced by the new job.
    pub async fn create_analyze_chunk(
        &self,
        chunk_id: i64,
        session_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let chunk = sqlx::query_as::<_, StreamChunk>("SELECT * FROM stream_chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found("stream chunk", chunk_id.to_string()))?;

        if chunk.transcript.trim().is_empty() {
            return Err(Error::invalid_input(format!(
                "chunk {} has an empty transcript",
                chunk_id
            )));
        }

        if let Some(existing_id) = chunk.analysis_job_id {
            let existing = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
                .bind(existing_id)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(existing) = existing {
                match existing.status {
                    JobStatus::Pending | JobStatus::Processing => {
                        return Err(Error::conflict(format!(
                            "chunk {} already has a queued analysis job ({})",
                            chunk_id, existing.id
                        )));
                    }
                    JobStatus::Completed => {
                        return Err(Error::conflict(format!(
                            "chunk {} was already analyzed by job {}",
                            chunk_id, existing.id
                        )));
                    }
                    JobStatus::Failed => {
                        debug!(
                            "Replacing failed analysis job {} for chunk {}",
                            existing.id, chunk_id
                        );
                    }
                }
            }
        }

        let mut meta = metadata.unwrap_or_else(|| serde_json::json!({}));
        if let Some(map) = meta.as_object_mut() {
            map.insert("sessionId".to_string(), serde_json::json!(session_id));
            map.insert("chunkId".to_string(), serde_json::json!(chunk_id));
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (job_type, status, provider, input_text, metadata)
            VALUES ('analyze_chunk', 'pending', 'local', ?, ?)
            RETURNING *
            "#,
        )
        .bind(&chunk.transcript)
        .bind(meta.to_string())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE stream_chunks SET analysis_job_id = ? WHERE id = ?")
            .bind(job.id)
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("Created analysis job {} for chunk {}", job.id, chunk_id);
        Ok(job)
    }

    /// Atomically claim the oldest pending job.
    ///
    /// A single guarded UPDATE selects the FIFO head and moves it to
    /// `processing`; concurrent claimers can never receive the same row.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = CURRENT_TIMESTAMP
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref job) = job {
            debug!("Claimed job {} ({})", job.id, job.job_type);
        }
        Ok(job)
    }

    /// Transition `processing -> completed`.
    ///
    /// Returns false (with a warning) when the job is no longer in
    /// `processing` — typically because the health monitor already
    /// finalized it. Never raises on the stale path.
    pub async fn complete(&self, job_id: i64, outcome: JobOutcome) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                output_text = ?,
                model_used = ?,
                processing_time_ms = ?,
                confidence = ?,
                raw_response = ?,
                raw_response_type = ?,
                completed_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&outcome.output_text)
        .bind(&outcome.model_used)
        .bind(outcome.processing_time_ms)
        .bind(outcome.confidence)
        .bind(&outcome.raw_response)
        .bind(&outcome.raw_response_type)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            info!(
                "Job {} completed in {}ms",
                job_id, outcome.processing_time_ms
            );
        } else {
            warn!("Ignoring completion for job {} not in processing state", job_id);
        }
        Ok(applied)
    }

    /// Transition `processing -> failed` under the same guard as `complete`
    pub async fn fail(&self, job_id: i64, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = ?, completed_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(error_message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            info!("Job {} failed: {}", job_id, error_message);
        } else {
            warn!("Ignoring failure for job {} not in processing state", job_id);
        }
        Ok(applied)
    }

    /// Record a streaming heartbeat for a long-running job
    pub async fn heartbeat(&self, job_id: i64, token_count: u64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET last_heartbeat = CURRENT_TIMESTAMP, heartbeat_count = ? WHERE id = ?",
        )
        .bind(token_count as i64)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that the provider confirmed its model is loaded
    pub async fn mark_model_verified(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET model_verified = 1 WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get a job by id
    pub async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// List all jobs linked to a submission, oldest first
    pub async fn list_by_submission(&self, submission_id: &str) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE audio_file_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// List the most recently created jobs
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Aggregate queue statistics
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) as processing,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) as failed,
                AVG(CASE WHEN status = 'completed' THEN processing_time_ms END) as avg_processing_ms
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStatus {
            total: row.get("total"),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            avg_processing_ms: row.get("avg_processing_ms"),
        })
    }

    /// Delete every job linked to a submission; returns the number removed
    pub async fn delete_by_submission(&self, submission_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE audio_file_id = ?")
            .bind(submission_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Processing jobs whose heartbeat (or start time, if they never beat)
    /// is older than their timeout
    pub async fn stuck_jobs(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'processing'
              AND (
                (last_heartbeat IS NULL
                    AND strftime('%s', 'now') - strftime('%s', started_at)
                        > COALESCE(timeout_seconds, 300))
                OR
                (last_heartbeat IS NOT NULL
                    AND strftime('%s', 'now') - strftime('%s', last_heartbeat)
                        > COALESCE(timeout_seconds, 300))
              )
            ORDER BY started_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// All jobs currently marked `processing`, regardless of age
    pub async fn processing_jobs(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'processing' ORDER BY started_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}

fn encode_metadata(metadata: Option<serde_json::Value>) -> Result<Option<String>> {
    Ok(metadata.map(|m| m.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::storage::database::DatabaseManager;
    use crate::storage::models::{CreateChunk, JobType};
    use crate::storage::repositories::chunk::ChunkRepository;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, JobRepository, ChunkRepository) {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: temp_dir.path().join("test.db"),
            max_connections: 5,
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        let pool = manager.pool().clone();
        (
            temp_dir,
            JobRepository::new(pool.clone()),
            ChunkRepository::new(pool),
        )
    }

    fn transcribe_input(path: &str) -> CreateTranscribeJob {
        CreateTranscribeJob {
            audio_path: path.to_string(),
            submission_id: None,
            metadata: None,
            provider: "local".to_string(),
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, jobs, _) = setup().await;

        let job = jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_type, JobType::Transcribe);
        assert_eq!(job.timeout_seconds, 300);
        assert!(job.started_at.is_none());

        let fetched = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.input_file_path.as_deref(), Some("a.wav"));
        assert!(jobs.get(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summarize_requires_text() {
        let (_dir, jobs, _) = setup().await;
        let result = jobs
            .create_summarize(CreateSummarizeJob {
                text: "   ".to_string(),
                submission_id: None,
                metadata: None,
                provider: "local".to_string(),
                timeout_seconds: None,
            })
            .await;
        assert!(matches!(result, Err(crate::error::Error::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let (_dir, jobs, _) = setup().await;

        let first = jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();
        let second = jobs.create_transcribe(transcribe_input("b.wav")).await.unwrap();

        let claimed = jobs.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started_at.is_some());

        let claimed = jobs.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(jobs.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claim_yields_single_winner() {
        let (_dir, jobs, _) = setup().await;
        jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();

        let (a, b) = tokio::join!(jobs.claim_next(), jobs.claim_next());
        let wins = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|j| j.is_some())
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_complete_guard() {
        let (_dir, jobs, _) = setup().await;
        let job = jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();

        // Completing a pending job is a no-op
        let outcome = JobOutcome {
            output_text: "hello".to_string(),
            model_used: "m".to_string(),
            processing_time_ms: 10,
            ..Default::default()
        };
        assert!(!jobs.complete(job.id, outcome.clone()).await.unwrap());

        let claimed = jobs.claim_next().await.unwrap().unwrap();
        assert!(jobs.complete(claimed.id, outcome.clone()).await.unwrap());

        // Second completion and a late failure are both ignored
        assert!(!jobs.complete(claimed.id, outcome).await.unwrap());
        assert!(!jobs.fail(claimed.id, "late").await.unwrap());

        let job = jobs.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_text.as_deref(), Some("hello"));
        assert!(job.completed_at.is_some());
        assert_eq!(job.processing_time_ms, Some(10));
    }

    #[tokio::test]
    async fn test_fail_sets_error() {
        let (_dir, jobs, _) = setup().await;
        jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();
        let claimed = jobs.claim_next().await.unwrap().unwrap();

        assert!(jobs.fail(claimed.id, "provider exploded").await.unwrap());
        let job = jobs.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("provider exploded"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_queue_status() {
        let (_dir, jobs, _) = setup().await;
        jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();
        jobs.create_transcribe(transcribe_input("b.wav")).await.unwrap();

        let claimed = jobs.claim_next().await.unwrap().unwrap();
        jobs.complete(
            claimed.id,
            JobOutcome {
                output_text: "x".to_string(),
                model_used: "m".to_string(),
                processing_time_ms: 40,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let status = jobs.queue_status().await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.pending, 1);
        assert_eq!(status.processing, 0);
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(status.avg_processing_ms, Some(40.0));
    }

    #[tokio::test]
    async fn test_analyze_chunk_validation_ladder() {
        let (_dir, jobs, chunks) = setup().await;
        chunks
            .create_session("sess", "sub", None)
            .await
            .unwrap();
        let chunk = chunks
            .create_chunk(CreateChunk {
                session_id: "sess".to_string(),
                chunk_index: 0,
                speaker: Some(0),
                transcript: "one two three".to_string(),
                confidence: Some(0.9),
                start_time_ms: 0,
                end_time_ms: 1200,
                word_count: None,
            })
            .await
            .unwrap();

        // Missing chunk
        let err = jobs.create_analyze_chunk(999, "sess", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // First job links to the chunk
        let job = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap();
        assert_eq!(job.input_text.as_deref(), Some("one two three"));
        let meta = job.metadata_value();
        assert_eq!(meta["sessionId"], "sess");
        assert_eq!(meta["chunkId"], chunk.id);

        // Pending duplicate is a conflict
        let err = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // Completed analysis is a conflict too
        let claimed = jobs.claim_next().await.unwrap().unwrap();
        jobs.complete(
            claimed.id,
            JobOutcome {
                output_text: "{}".to_string(),
                model_used: "m".to_string(),
                processing_time_ms: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_analyze_chunk_replaces_failed_job() {
        let (_dir, jobs, chunks) = setup().await;
        chunks.create_session("sess", "sub", None).await.unwrap();
        let chunk = chunks
            .create_chunk(CreateChunk {
                session_id: "sess".to_string(),
                chunk_index: 0,
                speaker: None,
                transcript: "four five".to_string(),
                confidence: None,
                start_time_ms: 0,
                end_time_ms: 900,
                word_count: None,
            })
            .await
            .unwrap();

        let first = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap();
        let claimed = jobs.claim_next().await.unwrap().unwrap();
        jobs.fail(claimed.id, "model crashed").await.unwrap();

        let second = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap();
        assert_ne!(first.id, second.id);

        let linked = chunks.get_chunk(chunk.id).await.unwrap().unwrap();
        assert_eq!(linked.analysis_job_id, Some(second.id));
    }

    #[tokio::test]
    async fn test_analyze_chunk_rejects_blank_transcript() {
        let (_dir, jobs, chunks) = setup().await;
        chunks.create_session("sess", "sub", None).await.unwrap();
        let chunk = chunks
            .create_chunk(CreateChunk {
                session_id: "sess".to_string(),
                chunk_index: 0,
                speaker: None,
                transcript: "   ".to_string(),
                confidence: None,
                start_time_ms: 0,
                end_time_ms: 100,
                word_count: None,
            })
            .await
            .unwrap();

        let err = jobs.create_analyze_chunk(chunk.id, "sess", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_updates() {
        let (_dir, jobs, _) = setup().await;
        jobs.create_transcribe(transcribe_input("a.wav")).await.unwrap();
        let claimed = jobs.claim_next().await.unwrap().unwrap();
        assert!(claimed.last_heartbeat.is_none());

        jobs.heartbeat(claimed.id, 3).await.unwrap();
        let job = jobs.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.heartbeat_count, 3);
        assert!(job.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn test_delete_by_submission() {
        let (_dir, jobs, _) = setup().await;
        for _ in 0..2 {
            jobs.create_transcribe(CreateTranscribeJob {
                audio_path: "a.wav".to_string(),
                submission_id: Some("sub-1".to_string()),
                metadata: None,
                provider: "local".to_string(),
                timeout_seconds: None,
            })
            .await
            .unwrap();
        }
        jobs.create_transcribe(transcribe_input("other.wav")).await.unwrap();

        assert_eq!(jobs.delete_by_submission("sub-1").await.unwrap(), 2);
        assert!(jobs.list_by_submission("sub-1").await.unwrap().is_empty());
        assert_eq!(jobs.queue_status().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_list_recent_and_by_submission() {
        let (_dir, jobs, _) = setup().await;
        for i in 0..3 {
            jobs.create_transcribe(CreateTranscribeJob {
                audio_path: format!("{i}.wav"),
                submission_id: Some("sub-1".to_string()),
                metadata: None,
                provider: "local".to_string(),
                timeout_seconds: None,
            })
            .await
            .unwrap();
        }

        let recent = jobs.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);

        let linked = jobs.list_by_submission("sub-1").await.unwrap();
        assert_eq!(linked.len(), 3);
        assert!(linked[0].id < linked[2].id);
    }
}
