//! Stream session and chunk repository

use crate::error::{Error, Result};
use crate::storage::database::DatabasePool;
use crate::storage::models::{
    count_words, ChunkWithAnalysis, CreateChunk, Job, StreamChunk, StreamSession,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

/// Repository for live-stream sessions and their chunks
#[derive(Clone)]
pub struct ChunkRepository {
    pool: DatabasePool,
}

impl ChunkRepository {
    /// Create a new chunk repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Create a stream session bound 1:1 to a submission
    pub async fn create_session(
        &self,
        id: &str,
        submission_id: &str,
        title: Option<&str>,
    ) -> Result<StreamSession> {
        let session = sqlx::query_as::<_, StreamSession>(
            r#"
            INSERT INTO stream_sessions (id, submission_id, title, status)
            VALUES (?, ?, ?, 'active')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(submission_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        info!("Created stream session {} for submission {}", id, submission_id);
        Ok(session)
    }

    /// Get a session by id
    pub async fn get_session(&self, id: &str) -> Result<Option<StreamSession>> {
        let session =
            sqlx::query_as::<_, StreamSession>("SELECT * FROM stream_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    /// Persist one finalized utterance
    pub async fn create_chunk(&self, input: CreateChunk) -> Result<StreamChunk> {
        if input.end_time_ms < input.start_time_ms {
            return Err(Error::invalid_input(format!(
                "chunk end {}ms precedes start {}ms",
                input.end_time_ms, input.start_time_ms
            )));
        }
        let word_count = input
            .word_count
            .unwrap_or_else(|| count_words(&input.transcript));

        let chunk = sqlx::query_as::<_, StreamChunk>(
            r#"
            INSERT INTO stream_chunks
                (session_id, chunk_index, speaker, transcript, confidence,
                 start_time_ms, end_time_ms, word_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&input.session_id)
        .bind(input.chunk_index)
        .bind(input.speaker)
        .bind(&input.transcript)
        .bind(input.confidence)
        .bind(input.start_time_ms)
        .bind(input.end_time_ms)
        .bind(word_count)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            "Persisted chunk {} (session {}, index {})",
            chunk.id, chunk.session_id, chunk.chunk_index
        );
        Ok(chunk)
    }

    /// Get a chunk by id
    pub async fn get_chunk(&self, id: i64) -> Result<Option<StreamChunk>> {
        let chunk = sqlx::query_as::<_, StreamChunk>("SELECT * FROM stream_chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chunk)
    }

    /// Link a chunk to its analysis job
    pub async fn set_chunk_analysis_job(&self, chunk_id: i64, job_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE stream_chunks SET analysis_job_id = ? WHERE id = ?")
            .bind(job_id)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("stream chunk", chunk_id.to_string()));
        }
        Ok(())
    }

    /// Chunks of one session joined with their analysis jobs, index order
    pub async fn chunks_for_session_with_analysis(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChunkWithAnalysis>> {
        let rows = sqlx::query(&joined_query("WHERE c.session_id = ?", "c.chunk_index ASC"))
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(chunk_with_analysis_from_row).collect()
    }

    /// Every chunk ever persisted joined with its analysis job.
    ///
    /// Creation order across sessions, index order within one.
    pub async fn all_chunks_with_analysis(&self) -> Result<Vec<ChunkWithAnalysis>> {
        let rows = sqlx::query(&joined_query("", "c.created_at ASC, c.id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(chunk_with_analysis_from_row).collect()
    }

    /// Close a session: terminal status, end time, chunk count, duration.
    ///
    /// Only an `active` row is updated, so a second call changes nothing.
    pub async fn end_session(&self, session_id: &str, total_duration_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stream_sessions
            SET status = 'ended',
                ended_at = CURRENT_TIMESTAMP,
                total_duration_ms = ?,
                chunk_count = (SELECT COUNT(*) FROM stream_chunks WHERE session_id = ?)
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(total_duration_ms)
        .bind(session_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            info!("Ended stream session {}", session_id);
        }
        Ok(applied)
    }
}

fn joined_query(where_clause: &str, order_clause: &str) -> String {
    format!(
        r#"
        SELECT
            c.id, c.session_id, c.chunk_index, c.speaker, c.transcript, c.confidence,
            c.start_time_ms, c.end_time_ms, c.word_count, c.analysis_job_id, c.created_at,
            j.id AS aj_id, j.job_type AS aj_job_type, j.status AS aj_status,
            j.provider AS aj_provider, j.input_file_path AS aj_input_file_path,
            j.input_text AS aj_input_text, j.output_text AS aj_output_text,
            j.error_message AS aj_error_message, j.audio_file_id AS aj_audio_file_id,
            j.metadata AS aj_metadata, j.created_at AS aj_created_at,
            j.started_at AS aj_started_at, j.completed_at AS aj_completed_at,
            j.processing_time_ms AS aj_processing_time_ms, j.model_used AS aj_model_used,
            j.confidence AS aj_confidence, j.raw_response AS aj_raw_response,
            j.raw_response_type AS aj_raw_response_type, j.last_heartbeat AS aj_last_heartbeat,
            j.heartbeat_count AS aj_heartbeat_count, j.model_verified AS aj_model_verified,
            j.timeout_seconds AS aj_timeout_seconds
        FROM stream_chunks c
        LEFT JOIN jobs j ON c.analysis_job_id = j.id
        {where_clause}
        ORDER BY {order_clause}
        "#
    )
}

fn chunk_with_analysis_from_row(row: &SqliteRow) -> Result<ChunkWithAnalysis> {
    let chunk = StreamChunk {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        chunk_index: row.try_get("chunk_index")?,
        speaker: row.try_get("speaker")?,
        transcript: row.try_get("transcript")?,
        confidence: row.try_get("confidence")?,
        start_time_ms: row.try_get("start_time_ms")?,
        end_time_ms: row.try_get("end_time_ms")?,
        word_count: row.try_get("word_count")?,
        analysis_job_id: row.try_get("analysis_job_id")?,
        created_at: row.try_get("created_at")?,
    };

    let analysis = match row.try_get::<Option<i64>, _>("aj_id")? {
        Some(id) => Some(Job {
            id,
            job_type: row.try_get("aj_job_type")?,
            status: row.try_get("aj_status")?,
            provider: row.try_get("aj_provider")?,
            input_file_path: row.try_get("aj_input_file_path")?,
            input_text: row.try_get("aj_input_text")?,
            output_text: row.try_get("aj_output_text")?,
            error_message: row.try_get("aj_error_message")?,
            audio_file_id: row.try_get("aj_audio_file_id")?,
            metadata: row.try_get("aj_metadata")?,
            created_at: row.try_get("aj_created_at")?,
            started_at: row.try_get("aj_started_at")?,
            completed_at: row.try_get("aj_completed_at")?,
            processing_time_ms: row.try_get("aj_processing_time_ms")?,
            model_used: row.try_get("aj_model_used")?,
            confidence: row.try_get("aj_confidence")?,
            raw_response: row.try_get("aj_raw_response")?,
            raw_response_type: row.try_get("aj_raw_response_type")?,
            last_heartbeat: row.try_get("aj_last_heartbeat")?,
            heartbeat_count: row.try_get("aj_heartbeat_count")?,
            model_verified: row.try_get("aj_model_verified")?,
            timeout_seconds: row.try_get("aj_timeout_seconds")?,
        }),
        None => None,
    };

    Ok(ChunkWithAnalysis { chunk, analysis })
}
