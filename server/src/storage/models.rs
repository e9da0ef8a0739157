//! Row types, status enums, and write inputs for the four core tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One audio artifact, uploaded or captured from a live stream
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum SubmissionStatus {
    #[sqlx(rename = "pending")]
    Pending,
    #[sqlx(rename = "transcribing")]
    Transcribing,
    #[sqlx(rename = "summarizing")]
    Summarizing,
    #[sqlx(rename = "streaming")]
    Streaming,
    #[sqlx(rename = "completed")]
    Completed,
    #[sqlx(rename = "failed")]
    Failed,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "pending"),
            SubmissionStatus::Transcribing => write!(f, "transcribing"),
            SubmissionStatus::Summarizing => write!(f, "summarizing"),
            SubmissionStatus::Streaming => write!(f, "streaming"),
            SubmissionStatus::Completed => write!(f, "completed"),
            SubmissionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Unit of inference work
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub provider: String,
    pub input_file_path: Option<String>,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub error_message: Option<String>,
    pub audio_file_id: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub model_used: Option<String>,
    pub confidence: Option<f64>,
    pub raw_response: Option<String>,
    pub raw_response_type: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_count: i64,
    pub model_verified: bool,
    pub timeout_seconds: i64,
}

impl Job {
    /// Parsed metadata blob; an empty object when absent or malformed
    pub fn metadata_value(&self) -> serde_json::Value {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Whether a successful transcription should chain a summarize job
    pub fn auto_summarize(&self) -> bool {
        self.metadata_value()
            .get("autoSummarize")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Job type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum JobType {
    #[sqlx(rename = "transcribe")]
    #[serde(rename = "transcribe")]
    Transcribe,
    #[sqlx(rename = "summarize")]
    #[serde(rename = "summarize")]
    Summarize,
    #[sqlx(rename = "analyze_chunk")]
    #[serde(rename = "analyze_chunk")]
    AnalyzeChunk,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Transcribe => write!(f, "transcribe"),
            JobType::Summarize => write!(f, "summarize"),
            JobType::AnalyzeChunk => write!(f, "analyze_chunk"),
        }
    }
}

/// Job status enumeration; transitions are one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum JobStatus {
    #[sqlx(rename = "pending")]
    #[serde(rename = "pending")]
    Pending,
    #[sqlx(rename = "processing")]
    #[serde(rename = "processing")]
    Processing,
    #[sqlx(rename = "completed")]
    #[serde(rename = "completed")]
    Completed,
    #[sqlx(rename = "failed")]
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One live broadcast, 1:1 with a streaming submission
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamSession {
    pub id: String,
    pub submission_id: String,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<i64>,
    pub chunk_count: i64,
    pub status: SessionStatus,
}

/// Stream session status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum SessionStatus {
    #[sqlx(rename = "active")]
    Active,
    #[sqlx(rename = "ended")]
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

/// One finalized utterance within a session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamChunk {
    pub id: i64,
    pub session_id: String,
    pub chunk_index: i64,
    pub speaker: Option<i64>,
    pub transcript: String,
    pub confidence: Option<f64>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub word_count: i64,
    pub analysis_job_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A chunk joined with its analysis job row, when one is linked
#[derive(Debug, Clone)]
pub struct ChunkWithAnalysis {
    pub chunk: StreamChunk,
    pub analysis: Option<Job>,
}

/// Aggregate queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_processing_ms: Option<f64>,
}

/// Input for creating a new submission
#[derive(Debug, Clone)]
pub struct CreateSubmission {
    pub filename: String,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub status: SubmissionStatus,
    pub metadata: Option<serde_json::Value>,
    /// Enqueue a transcribe job (with summarize auto-chain) on creation
    pub auto_process: bool,
    pub provider: String,
}

impl CreateSubmission {
    /// Upload-path submission with auto-processing enabled
    pub fn upload(filename: impl Into<String>, file_path: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            original_filename: filename.clone(),
            filename,
            file_path: Some(file_path.into()),
            mime_type: None,
            size_bytes: None,
            duration_seconds: None,
            status: SubmissionStatus::Pending,
            metadata: None,
            auto_process: true,
            provider: "local".to_string(),
        }
    }
}

/// Input for creating a new transcribe job
#[derive(Debug, Clone)]
pub struct CreateTranscribeJob {
    pub audio_path: String,
    pub submission_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub provider: String,
    pub timeout_seconds: Option<i64>,
}

/// Input for creating a new summarize job
#[derive(Debug, Clone)]
pub struct CreateSummarizeJob {
    pub text: String,
    pub submission_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub provider: String,
    pub timeout_seconds: Option<i64>,
}

/// Terminal outcome recorded when a processing job completes
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub output_text: String,
    pub model_used: String,
    pub processing_time_ms: i64,
    pub confidence: Option<f64>,
    pub raw_response: Option<String>,
    pub raw_response_type: Option<String>,
}

/// Input for creating a new stream chunk
#[derive(Debug, Clone)]
pub struct CreateChunk {
    pub session_id: String,
    pub chunk_index: i64,
    pub speaker: Option<i64>,
    pub transcript: String,
    pub confidence: Option<f64>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    /// Defaults to the whitespace token count of the transcript
    pub word_count: Option<i64>,
}

/// Filter options for submission listings
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of filtered submissions plus the unpaginated total
#[derive(Debug, Clone)]
pub struct SubmissionPage {
    pub rows: Vec<Submission>,
    pub total: i64,
}

/// Count of whitespace-separated non-empty tokens
pub fn count_words(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(SubmissionStatus::Transcribing.to_string(), "transcribing");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobType::AnalyzeChunk.to_string(), "analyze_chunk");
        assert_eq!(SessionStatus::Ended.to_string(), "ended");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(SubmissionStatus::Failed.is_terminal());
        assert!(!SubmissionStatus::Streaming.is_terminal());
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("one two three"), 3);
        assert_eq!(count_words("  spaced   out  "), 2);
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   "), 0);
    }

    #[test]
    fn test_job_auto_summarize_metadata() {
        let mut job = Job {
            id: 1,
            job_type: JobType::Transcribe,
            status: JobStatus::Pending,
            provider: "local".to_string(),
            input_file_path: Some("a.wav".to_string()),
            input_text: None,
            output_text: None,
            error_message: None,
            audio_file_id: None,
            metadata: Some(r#"{"autoSummarize":true}"#.to_string()),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
            model_used: None,
            confidence: None,
            raw_response: None,
            raw_response_type: None,
            last_heartbeat: None,
            heartbeat_count: 0,
            model_verified: false,
            timeout_seconds: 300,
        };
        assert!(job.auto_summarize());

        job.metadata = None;
        assert!(!job.auto_summarize());

        job.metadata = Some("not json".to_string());
        assert!(!job.auto_summarize());
    }
}
