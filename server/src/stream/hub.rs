//! Broadcaster/viewer streaming hub
//!
//! One broadcaster slot, many read-only viewers. Audio from the broadcaster
//! is persisted to a WAV sink and relayed to the STT backend; transcript
//! segments fan out live, collapse into persisted chunks on utterance
//! boundaries, and schedule per-chunk analysis jobs. Late viewers get a full
//! replay of chunk history.

use crate::error::Result;
use crate::events::EventBus;
use crate::providers::types::AnalysisOutput;
use crate::storage::models::{
    CreateChunk, CreateSubmission, JobStatus, StreamChunk, SubmissionStatus,
};
use crate::storage::repositories::{ChunkRepository, JobRepository, SubmissionRepository};
use crate::stream::segments::{ChunkDraft, SegmentAccumulator};
use crate::stream::stt::{SttConnector, SttEvent, SttOptions, TranscriptSegment};
use crate::stream::wav::WavSink;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbound queue depth per attached socket
const CLIENT_QUEUE: usize = 256;

/// Trailing debounce for status broadcasts
const STATUS_DEBOUNCE_MS: u64 = 100;

/// Hub configuration slice
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub max_viewers: usize,
    pub min_words_for_analysis: i64,
    pub utterance_end_ms: u64,
    pub sample_rate_hz: u32,
    pub uploads_dir: PathBuf,
}

/// Frames sent to broadcaster and viewer sockets
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    AuthSuccess,
    SessionStarted,
    SessionEnded,
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
        submission_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ChunkCreated {
        session_id: String,
        chunk: ChunkPayload,
    },
    #[serde(rename_all = "camelCase")]
    ChunkAnalyzed {
        session_id: String,
        chunk_id: i64,
        topics: Vec<String>,
        intents: Vec<String>,
        summary: String,
        sentiment: String,
    },
    #[serde(rename_all = "camelCase")]
    Transcript {
        speaker: Option<i64>,
        text: String,
        confidence: Option<f64>,
        is_final: bool,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    Status { is_live: bool, viewer_count: usize },
    Error { message: String },
}

impl StreamEvent {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Chunk fields carried by `chunk_created`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub id: i64,
    pub index: i64,
    pub speaker: Option<i64>,
    pub transcript: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub will_be_analyzed: bool,
}

impl ChunkPayload {
    fn from_chunk(chunk: &StreamChunk, will_be_analyzed: bool) -> Self {
        Self {
            id: chunk.id,
            index: chunk.chunk_index,
            speaker: chunk.speaker,
            transcript: chunk.transcript.clone(),
            start_time_ms: chunk.start_time_ms,
            end_time_ms: chunk.end_time_ms,
            will_be_analyzed,
        }
    }
}

enum BroadcasterSlot {
    Empty,
    /// Claimed but still bringing the session up
    Pending,
    Active(mpsc::Sender<StreamEvent>),
}

struct HubState {
    broadcaster: BroadcasterSlot,
    viewers: HashMap<u64, mpsc::Sender<StreamEvent>>,
    next_viewer_id: u64,
    active_session_id: Option<String>,
    stt_connected: bool,
}

/// Per-session state owned by the hub until finalization
struct ActiveSession {
    session_id: String,
    submission_id: String,
    wav: Option<WavSink>,
    wav_failed: bool,
    accumulator: SegmentAccumulator,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    next_chunk_index: i64,
    last_event_end_ms: i64,
    finalized: bool,
}

/// Handle the socket layer drives for an authenticated broadcaster
pub struct BroadcasterConn {
    hub: Arc<StreamHub>,
    session: Arc<AsyncMutex<ActiveSession>>,
}

/// Streaming hub bridging one broadcaster to many viewers
pub struct StreamHub {
    jobs: JobRepository,
    chunks: ChunkRepository,
    submissions: SubmissionRepository,
    events: Arc<EventBus>,
    stt: Arc<dyn SttConnector>,
    settings: StreamSettings,
    state: Mutex<HubState>,
    status_pending: AtomicBool,
}

impl StreamHub {
    /// Create a new hub; no broadcaster, no viewers
    pub fn new(
        jobs: JobRepository,
        chunks: ChunkRepository,
        submissions: SubmissionRepository,
        events: Arc<EventBus>,
        stt: Arc<dyn SttConnector>,
        settings: StreamSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            chunks,
            submissions,
            events,
            stt,
            settings,
            state: Mutex::new(HubState {
                broadcaster: BroadcasterSlot::Empty,
                viewers: HashMap::new(),
                next_viewer_id: 0,
                active_session_id: None,
                stt_connected: false,
            }),
            status_pending: AtomicBool::new(false),
        })
    }

    /// Accept a broadcaster connection.
    ///
    /// Only loopback peers may broadcast, and only one at a time; rejected
    /// connections get the returned error frame and nothing else.
    pub async fn connect_broadcaster(
        self: &Arc<Self>,
        addr: SocketAddr,
    ) -> std::result::Result<(BroadcasterConn, mpsc::Receiver<StreamEvent>), StreamEvent> {
        if !addr.ip().is_loopback() {
            warn!("Rejecting broadcaster from non-loopback address {}", addr);
            return Err(StreamEvent::error(
                "broadcaster connections are restricted to localhost",
            ));
        }

        {
            let mut state = self.state.lock().expect("hub state poisoned");
            if !matches!(state.broadcaster, BroadcasterSlot::Empty) {
                return Err(StreamEvent::error("a broadcaster is already connected"));
            }
            state.broadcaster = BroadcasterSlot::Pending;
        }

        match self.bring_up_session().await {
            Ok((session, outbound_tx, outbound_rx)) => {
                let (session_id, submission_id) = {
                    let s = session.lock().await;
                    (s.session_id.clone(), s.submission_id.clone())
                };

                {
                    let mut state = self.state.lock().expect("hub state poisoned");
                    state.broadcaster = BroadcasterSlot::Active(outbound_tx.clone());
                    state.active_session_id = Some(session_id.clone());
                    state.stt_connected = true;
                }

                let _ = outbound_tx.try_send(StreamEvent::AuthSuccess);
                self.broadcast_all(StreamEvent::SessionStarted);
                self.broadcast_all(StreamEvent::SessionCreated {
                    session_id: session_id.clone(),
                    submission_id,
                });
                self.schedule_status();

                info!("Broadcaster authenticated; session {} live", session_id);
                Ok((
                    BroadcasterConn {
                        hub: self.clone(),
                        session,
                    },
                    outbound_rx,
                ))
            }
            Err(e) => {
                error!("Stream session bring-up failed: {}", e);
                self.state.lock().expect("hub state poisoned").broadcaster = BroadcasterSlot::Empty;
                Err(StreamEvent::error(e.to_string()))
            }
        }
    }

    /// Allocate submission + session rows, open the audio sink and the STT
    /// relay, and start the event pump.
    async fn bring_up_session(
        self: &Arc<Self>,
    ) -> Result<(
        Arc<AsyncMutex<ActiveSession>>,
        mpsc::Sender<StreamEvent>,
        mpsc::Receiver<StreamEvent>,
    )> {
        let filename = format!("stream_{}.wav", Uuid::new_v4());
        let path = self.settings.uploads_dir.join(&filename);
        let wav = WavSink::create(&path, self.settings.sample_rate_hz)?;

        let (submission, _) = self
            .submissions
            .create(CreateSubmission {
                filename: filename.clone(),
                original_filename: filename,
                file_path: Some(path.to_string_lossy().to_string()),
                mime_type: Some("audio/wav".to_string()),
                size_bytes: None,
                duration_seconds: None,
                status: SubmissionStatus::Streaming,
                metadata: Some(serde_json::json!({ "source": "live-stream" })),
                auto_process: false,
                provider: "local".to_string(),
            })
            .await?;

        let session_id = Uuid::new_v4().to_string();
        self.chunks
            .create_session(&session_id, &submission.id, None)
            .await?;

        let handle = match self
            .stt
            .open(&SttOptions {
                sample_rate_hz: self.settings.sample_rate_hz,
                utterance_end_ms: self.settings.utterance_end_ms,
                diarize: true,
            })
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self
                    .submissions
                    .fail_if_active(
                        &submission.id,
                        "could not reach the streaming transcription backend",
                    )
                    .await;
                let _ = self.chunks.end_session(&session_id, 0).await;
                return Err(e);
            }
        };

        let session = Arc::new(AsyncMutex::new(ActiveSession {
            session_id,
            submission_id: submission.id,
            wav: Some(wav),
            wav_failed: false,
            accumulator: SegmentAccumulator::new(),
            audio_tx: Some(handle.audio),
            next_chunk_index: 0,
            last_event_end_ms: 0,
            finalized: false,
        }));

        let hub = self.clone();
        let pump_session = session.clone();
        let mut events = handle.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub.on_stt_event(&pump_session, event).await;
            }
            hub.mark_stt_disconnected();
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(CLIENT_QUEUE);
        Ok((session, outbound_tx, outbound_rx))
    }

    /// Accept a viewer, send current status, replay chunk history.
    pub async fn connect_viewer(
        self: &Arc<Self>,
    ) -> std::result::Result<(u64, mpsc::Receiver<StreamEvent>), StreamEvent> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let viewer_id = {
            let mut state = self.state.lock().expect("hub state poisoned");
            if state.viewers.len() >= self.settings.max_viewers {
                warn!("Rejecting viewer: {} already attached", state.viewers.len());
                return Err(StreamEvent::error("viewer limit reached"));
            }
            let id = state.next_viewer_id;
            state.next_viewer_id += 1;
            state.viewers.insert(id, tx.clone());
            id
        };

        let _ = tx.send(self.current_status()).await;
        self.replay_history(&tx).await;
        self.schedule_status();

        debug!("Viewer {} attached", viewer_id);
        Ok((viewer_id, rx))
    }

    /// Remove a viewer after its socket closes
    pub fn disconnect_viewer(self: &Arc<Self>, viewer_id: u64) {
        let removed = self
            .state
            .lock()
            .expect("hub state poisoned")
            .viewers
            .remove(&viewer_id)
            .is_some();
        if removed {
            debug!("Viewer {} detached", viewer_id);
            self.schedule_status();
        }
    }

    /// Stream every persisted chunk, then analysis results for the
    /// chunks whose analysis already completed.
    async fn replay_history(&self, tx: &mpsc::Sender<StreamEvent>) {
        let rows = match self.chunks.all_chunks_with_analysis().await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Chunk replay query failed: {}", e);
                return;
            }
        };

        for row in &rows {
            let will_be_analyzed =
                row.chunk.word_count >= self.settings.min_words_for_analysis;
            let event = StreamEvent::ChunkCreated {
                session_id: row.chunk.session_id.clone(),
                chunk: ChunkPayload::from_chunk(&row.chunk, will_be_analyzed),
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        for row in &rows {
            let Some(job) = &row.analysis else { continue };
            if job.status != JobStatus::Completed {
                continue;
            }
            let Some(analysis) = job
                .output_text
                .as_deref()
                .and_then(|raw| serde_json::from_str::<AnalysisOutput>(raw).ok())
            else {
                continue;
            };
            let event = StreamEvent::ChunkAnalyzed {
                session_id: row.chunk.session_id.clone(),
                chunk_id: row.chunk.id,
                topics: analysis.topics,
                intents: analysis.intents,
                summary: analysis.summary,
                sentiment: analysis.sentiment,
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    /// Handle one event from the STT relay
    async fn on_stt_event(self: &Arc<Self>, session: &Arc<AsyncMutex<ActiveSession>>, event: SttEvent) {
        match event {
            SttEvent::Segment(segment) => self.on_segment(session, segment).await,
            SttEvent::UtteranceEnd { last_word_end } => {
                let end_ms = (last_word_end * 1000.0) as i64;
                let (draft, index, session_id) = {
                    let mut s = session.lock().await;
                    if s.finalized {
                        return;
                    }
                    s.last_event_end_ms = s.last_event_end_ms.max(end_ms);
                    let draft = s.accumulator.collapse(end_ms);
                    let index = draft.as_ref().map(|_| {
                        let index = s.next_chunk_index;
                        s.next_chunk_index += 1;
                        index
                    });
                    (draft, index, s.session_id.clone())
                };
                if let (Some(draft), Some(index)) = (draft, index) {
                    self.persist_chunk(&session_id, index, draft).await;
                }
            }
            SttEvent::Closed => self.mark_stt_disconnected(),
        }
    }

    async fn on_segment(
        self: &Arc<Self>,
        session: &Arc<AsyncMutex<ActiveSession>>,
        segment: TranscriptSegment,
    ) {
        // Every hypothesis, interim or final, goes out live
        self.broadcast_all(StreamEvent::Transcript {
            speaker: segment.speaker,
            text: segment.text.clone(),
            confidence: segment.confidence,
            is_final: segment.is_final,
            timestamp: Utc::now().to_rfc3339(),
        });

        if segment.is_final && !segment.text.trim().is_empty() {
            let mut s = session.lock().await;
            if s.finalized {
                return;
            }
            let end_ms = ((segment.start + segment.duration) * 1000.0) as i64;
            s.last_event_end_ms = s.last_event_end_ms.max(end_ms);
            s.accumulator.push(segment);
        }
    }

    /// Persist one collapsed utterance and schedule its analysis
    async fn persist_chunk(self: &Arc<Self>, session_id: &str, index: i64, draft: ChunkDraft) {
        let chunk = match self
            .chunks
            .create_chunk(CreateChunk {
                session_id: session_id.to_string(),
                chunk_index: index,
                speaker: draft.speaker,
                transcript: draft.transcript,
                confidence: draft.confidence,
                start_time_ms: draft.start_time_ms,
                end_time_ms: draft.end_time_ms,
                word_count: Some(draft.word_count),
            })
            .await
        {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("Failed to persist chunk {} of session {}: {}", index, session_id, e);
                return;
            }
        };

        let will_be_analyzed = chunk.word_count >= self.settings.min_words_for_analysis
            && !chunk.transcript.trim().is_empty();

        self.broadcast_all(StreamEvent::ChunkCreated {
            session_id: session_id.to_string(),
            chunk: ChunkPayload::from_chunk(&chunk, will_be_analyzed),
        });

        if will_be_analyzed {
            match self.jobs.create_analyze_chunk(chunk.id, session_id, None).await {
                Ok(job) => self.events.job_created(&job),
                Err(e) => warn!("Failed to schedule analysis for chunk {}: {}", chunk.id, e),
            }
        }
    }

    /// Fan an analysis result out after its job completes.
    ///
    /// Viewers always receive it; the broadcaster only while the chunk's
    /// session is still the live one.
    pub fn broadcast_chunk_analyzed(
        &self,
        session_id: &str,
        chunk_id: i64,
        analysis: &AnalysisOutput,
    ) {
        let event = StreamEvent::ChunkAnalyzed {
            session_id: session_id.to_string(),
            chunk_id,
            topics: analysis.topics.clone(),
            intents: analysis.intents.clone(),
            summary: analysis.summary.clone(),
            sentiment: analysis.sentiment.clone(),
        };

        let is_live_session = {
            let state = self.state.lock().expect("hub state poisoned");
            state.active_session_id.as_deref() == Some(session_id)
        };
        if is_live_session {
            self.broadcast_all(event);
        } else {
            self.broadcast_viewers(event);
        }
    }

    /// Flush the accumulator, close the sink, finalize rows, notify clients
    async fn finalize_session(self: &Arc<Self>, session: &Arc<AsyncMutex<ActiveSession>>) {
        let (session_id, submission_id, wav, wav_failed, remaining, index, audio_tx) = {
            let mut s = session.lock().await;
            if s.finalized {
                return;
            }
            s.finalized = true;
            let end_ms = s
                .accumulator
                .last_segment_end_ms()
                .unwrap_or(s.last_event_end_ms);
            let remaining = s.accumulator.collapse(end_ms);
            let index = remaining.as_ref().map(|_| {
                let index = s.next_chunk_index;
                s.next_chunk_index += 1;
                index
            });
            (
                s.session_id.clone(),
                s.submission_id.clone(),
                s.wav.take(),
                s.wav_failed,
                remaining,
                index,
                s.audio_tx.take(),
            )
        };

        // Dropping the sender closes the upstream relay
        drop(audio_tx);

        if let (Some(draft), Some(index)) = (remaining, index) {
            self.persist_chunk(&session_id, index, draft).await;
        }

        let mut duration_ms = 0i64;
        match wav {
            Some(sink) => match sink.finalize() {
                Ok((bytes, duration)) => {
                    duration_ms = (duration * 1000.0) as i64;
                    if let Err(e) = self
                        .submissions
                        .finalize_stream(&submission_id, bytes as i64, duration)
                        .await
                    {
                        error!("Failed to finalize submission {}: {}", submission_id, e);
                    }
                }
                Err(e) => {
                    error!("Audio sink finalize failed: {}", e);
                    let _ = self
                        .submissions
                        .fail_if_active(&submission_id, "audio capture file could not be finalized")
                        .await;
                }
            },
            None => {
                let reason = if wav_failed {
                    "audio capture file failed during streaming"
                } else {
                    "audio capture file missing at finalize"
                };
                let _ = self.submissions.fail_if_active(&submission_id, reason).await;
            }
        }

        if let Err(e) = self.chunks.end_session(&session_id, duration_ms).await {
            error!("Failed to end session {}: {}", session_id, e);
        }

        self.broadcast_all(StreamEvent::SessionEnded);

        {
            let mut state = self.state.lock().expect("hub state poisoned");
            state.broadcaster = BroadcasterSlot::Empty;
            state.active_session_id = None;
            state.stt_connected = false;
        }
        self.schedule_status();

        info!("Stream session {} finalized ({}ms)", session_id, duration_ms);
    }

    fn mark_stt_disconnected(self: &Arc<Self>) {
        let changed = {
            let mut state = self.state.lock().expect("hub state poisoned");
            std::mem::replace(&mut state.stt_connected, false)
        };
        if changed {
            self.schedule_status();
        }
    }

    fn current_status(&self) -> StreamEvent {
        let state = self.state.lock().expect("hub state poisoned");
        StreamEvent::Status {
            is_live: matches!(state.broadcaster, BroadcasterSlot::Active(_)) && state.stt_connected,
            viewer_count: state.viewers.len(),
        }
    }

    /// Debounced status broadcast; rapid connect/disconnect bursts coalesce
    /// into one frame after a 100ms trailing window.
    fn schedule_status(self: &Arc<Self>) {
        if self.status_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let hub = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(STATUS_DEBOUNCE_MS)).await;
            hub.status_pending.store(false, Ordering::SeqCst);
            let status = hub.current_status();
            hub.broadcast_all(status);
        });
    }

    /// Send to the broadcaster and every viewer without blocking.
    ///
    /// A viewer with a full queue is dropped (its channel closes, which
    /// closes its socket); the broadcaster just loses the frame.
    fn broadcast_all(&self, event: StreamEvent) {
        let mut state = self.state.lock().expect("hub state poisoned");
        if let BroadcasterSlot::Active(tx) = &state.broadcaster {
            let _ = tx.try_send(event.clone());
        }
        Self::fan_out(&mut state.viewers, event);
    }

    fn broadcast_viewers(&self, event: StreamEvent) {
        let mut state = self.state.lock().expect("hub state poisoned");
        Self::fan_out(&mut state.viewers, event);
    }

    fn fan_out(viewers: &mut HashMap<u64, mpsc::Sender<StreamEvent>>, event: StreamEvent) {
        viewers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Dropping viewer {}: outbound queue full", id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Viewer count snapshot, for diagnostics
    pub fn viewer_count(&self) -> usize {
        self.state.lock().expect("hub state poisoned").viewers.len()
    }
}

impl BroadcasterConn {
    /// Raw PCM from the broadcaster: append to the sink, relay upstream
    pub async fn handle_audio(&self, data: Vec<u8>) {
        let audio_tx = {
            let mut s = self.session.lock().await;
            if s.finalized {
                return;
            }
            if let Some(wav) = s.wav.as_mut() {
                if let Err(e) = wav.append_pcm(&data) {
                    // Keep relaying to STT even when persistence is broken
                    error!("Audio sink write failed: {}", e);
                    s.wav = None;
                    s.wav_failed = true;
                }
            }
            s.audio_tx.clone()
        };

        if let Some(tx) = audio_tx {
            if tx.send(data).await.is_err() {
                debug!("STT relay gone; dropping audio frame");
            }
        }
    }

    /// Control frame from the broadcaster; returns true when the stream
    /// should stop.
    pub async fn handle_text(&self, text: &str) -> bool {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => match value.get("type").and_then(|t| t.as_str()) {
                Some("stop") => {
                    self.hub.finalize_session(&self.session).await;
                    true
                }
                // Auth is granted on connect; a late auth frame is harmless
                Some("auth") => false,
                other => {
                    self.send_error(format!(
                        "unsupported control message: {}",
                        other.unwrap_or("<untyped>")
                    ));
                    false
                }
            },
            Err(_) => {
                self.send_error("control frames must be JSON");
                false
            }
        }
    }

    /// Socket closed; finalize if the stop frame never arrived
    pub async fn close(&self) {
        self.hub.finalize_session(&self.session).await;
    }

    fn send_error(&self, message: impl Into<String>) {
        let state = self.hub.state.lock().expect("hub state poisoned");
        if let BroadcasterSlot::Active(tx) = &state.broadcaster {
            let _ = tx.try_send(StreamEvent::error(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_wire_format() {
        let event = StreamEvent::Status {
            is_live: true,
            viewer_count: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["isLive"], true);
        assert_eq!(json["viewerCount"], 3);

        let event = StreamEvent::ChunkCreated {
            session_id: "s1".to_string(),
            chunk: ChunkPayload {
                id: 1,
                index: 0,
                speaker: Some(0),
                transcript: "one two".to_string(),
                start_time_ms: 0,
                end_time_ms: 1200,
                will_be_analyzed: true,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk_created");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["chunk"]["willBeAnalyzed"], true);
        assert_eq!(json["chunk"]["startTimeMs"], 0);

        let event = StreamEvent::Transcript {
            speaker: None,
            text: "hello".to_string(),
            confidence: Some(0.5),
            is_final: false,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["isFinal"], false);
        assert!(json["speaker"].is_null());
    }
}
