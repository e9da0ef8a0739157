//! Submission repository: lifecycle, name disambiguation, cascaded delete

use crate::error::Result;
use crate::storage::database::DatabasePool;
use crate::storage::models::{
    CreateSubmission, CreateTranscribeJob, Job, Submission, SubmissionFilter, SubmissionPage,
    SubmissionStatus,
};
use crate::storage::repositories::job::JobRepository;
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Repository for audio submissions
#[derive(Clone)]
pub struct SubmissionRepository {
    pool: DatabasePool,
    jobs: JobRepository,
}

impl SubmissionRepository {
    /// Create a new submission repository
    pub fn new(pool: DatabasePool, jobs: JobRepository) -> Self {
        Self { pool, jobs }
    }

    /// Insert a submission; when auto-processing is requested, a transcribe
    /// job carrying `autoSummarize` metadata is enqueued alongside.
    ///
    /// Returns the submission and the enqueued job, if any.
    pub async fn create(&self, input: CreateSubmission) -> Result<(Submission, Option<Job>)> {
        let id = Uuid::new_v4().to_string();
        let metadata = input.metadata.as_ref().map(|m| m.to_string());

        let submission = sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO audio_submissions
                (id, filename, original_filename, file_path, mime_type,
                 size_bytes, duration_seconds, status, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&input.filename)
        .bind(&input.original_filename)
        .bind(&input.file_path)
        .bind(&input.mime_type)
        .bind(input.size_bytes)
        .bind(input.duration_seconds)
        .bind(input.status)
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await?;

        info!("Created submission {} ({})", submission.id, submission.filename);

        let job = if input.auto_process {
            let audio_path = input.file_path.clone().unwrap_or_default();
            let job = self
                .jobs
                .create_transcribe(CreateTranscribeJob {
                    audio_path,
                    submission_id: Some(submission.id.clone()),
                    metadata: Some(serde_json::json!({ "autoSummarize": true })),
                    provider: input.provider.clone(),
                    timeout_seconds: None,
                })
                .await?;
            Some(job)
        } else {
            None
        };

        Ok((submission, job))
    }

    /// Get a submission by id
    pub async fn get(&self, id: &str) -> Result<Option<Submission>> {
        let submission =
            sqlx::query_as::<_, Submission>("SELECT * FROM audio_submissions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(submission)
    }

    /// Look up a submission by either its on-disk or original filename
    pub async fn get_by_filename(&self, name: &str) -> Result<Option<Submission>> {
        let submission = sqlx::query_as::<_, Submission>(
            "SELECT * FROM audio_submissions WHERE filename = ? OR original_filename = ? LIMIT 1",
        )
        .bind(name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(submission)
    }

    /// Filtered, paginated listing plus the unpaginated total
    pub async fn list_filtered(&self, filter: &SubmissionFilter) -> Result<SubmissionPage> {
        let mut clauses: Vec<&str> = Vec::new();
        if filter.min_duration.is_some() {
            clauses.push("duration_seconds >= ?");
        }
        if filter.max_duration.is_some() {
            clauses.push("duration_seconds <= ?");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as count FROM audio_submissions{where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(min) = filter.min_duration {
            count_query = count_query.bind(min);
        }
        if let Some(max) = filter.max_duration {
            count_query = count_query.bind(max);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("count");

        let rows_sql = format!(
            "SELECT * FROM audio_submissions{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut rows_query = sqlx::query_as::<_, Submission>(&rows_sql);
        if let Some(min) = filter.min_duration {
            rows_query = rows_query.bind(min);
        }
        if let Some(max) = filter.max_duration {
            rows_query = rows_query.bind(max);
        }
        let rows = rows_query
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(SubmissionPage { rows, total })
    }

    /// Disambiguate a display name against existing submissions.
    ///
    /// Collisions yield `base_N.ext` where N counts the rows whose original
    /// filename equals `name` or already carries the `base_…ext` pattern.
    pub async fn generate_unique_display_name(&self, name: &str) -> Result<String> {
        let (base, ext) = split_extension(name);
        let pattern = format!("{base}_%{ext}");

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM audio_submissions
             WHERE original_filename = ? OR original_filename LIKE ?",
        )
        .bind(name)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?
        .get("count");

        if count == 0 {
            Ok(name.to_string())
        } else {
            Ok(format!("{base}_{count}{ext}"))
        }
    }

    /// Set the submission status and error message
    pub async fn update_status(
        &self,
        id: &str,
        status: SubmissionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE audio_submissions
             SET status = ?, error_message = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a submission failed unless it already reached a terminal state
    pub async fn fail_if_active(&self, id: &str, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE audio_submissions
             SET status = 'failed', error_message = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Complete a streaming submission with its final size and duration
    pub async fn finalize_stream(
        &self,
        id: &str,
        size_bytes: i64,
        duration_seconds: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE audio_submissions
             SET status = 'completed', size_bytes = ?, duration_seconds = ?,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(size_bytes)
        .bind(duration_seconds)
        .bind(id)
        .execute(&self.pool)
        .await?;
        debug!("Finalized streaming submission {}", id);
        Ok(())
    }

    /// Cascaded delete: jobs and the submission row go in one transaction,
    /// then the on-disk file is unlinked best-effort.
    ///
    /// Returns whether a submission row existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(submission) = self.get(id).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobs WHERE audio_file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM audio_submissions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Some(path) = submission.file_path.as_deref() {
            if let Err(e) = tokio::fs::remove_file(Path::new(path)).await {
                warn!("Failed to unlink {} for submission {}: {}", path, id, e);
            }
        }

        info!("Deleted submission {}", id);
        Ok(true)
    }
}

/// Split `hello.flac` into `("hello", ".flac")`; no dot yields an empty
/// extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}
