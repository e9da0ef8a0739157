//! Upstream speech-to-text relay
//!
//! The hub pushes raw PCM into an `SttHandle` and reads transcript events
//! back. The wire implementation speaks a Deepgram-style streaming protocol
//! over WebSocket; tests substitute a scripted connector.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// One transcript hypothesis from the STT backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Option<i64>,
    pub text: String,
    pub confidence: Option<f64>,
    pub is_final: bool,
    /// Segment start, seconds from stream origin
    pub start: f64,
    /// Segment length in seconds
    pub duration: f64,
}

/// Events the relay surfaces to the hub
#[derive(Debug, Clone)]
pub enum SttEvent {
    Segment(TranscriptSegment),
    /// Speaker-silence boundary; carries the end of the last word in seconds
    UtteranceEnd { last_word_end: f64 },
    /// The upstream connection is gone
    Closed,
}

/// Connection parameters for the streaming session
#[derive(Debug, Clone)]
pub struct SttOptions {
    pub sample_rate_hz: u32,
    pub utterance_end_ms: u64,
    pub diarize: bool,
}

/// Live relay: audio goes in one side, events come out the other
pub struct SttHandle {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<SttEvent>,
}

/// Factory for streaming STT connections
#[async_trait]
pub trait SttConnector: Send + Sync {
    async fn open(&self, options: &SttOptions) -> Result<SttHandle>;
}

/// WebSocket connector for a Deepgram-style streaming endpoint
pub struct WsSttConnector {
    url: Option<String>,
    api_key: Option<String>,
}

impl WsSttConnector {
    pub fn new(url: Option<String>, api_key: Option<String>) -> Self {
        Self { url, api_key }
    }
}

#[async_trait]
impl SttConnector for WsSttConnector {
    async fn open(&self, options: &SttOptions) -> Result<SttHandle> {
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| Error::provider("stt", "no streaming STT endpoint configured"))?;

        let separator = if base.contains('?') { '&' } else { '?' };
        let url = format!(
            "{base}{separator}encoding=linear16&sample_rate={}&channels=1&interim_results=true&diarize={}&utterance_end_ms={}",
            options.sample_rate_hz, options.diarize, options.utterance_end_ms
        );

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::provider("stt", format!("bad endpoint url: {}", e)))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Token {key}"))
                .map_err(|e| Error::provider("stt", format!("bad api key: {}", e)))?;
            request.headers_mut().insert("authorization", value);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::provider("stt", format!("connect failed: {}", e)))?;
        debug!("STT relay connected");

        let (mut sink, mut stream) = ws.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (events_tx, events_rx) = mpsc::channel::<SttEvent>(64);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => match chunk {
                        Some(bytes) => {
                            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_stt_frame(text.as_str()) {
                                if events_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("STT relay read error: {}", e);
                            break;
                        }
                    },
                }
            }
            let _ = events_tx.send(SttEvent::Closed).await;
            debug!("STT relay closed");
        });

        Ok(SttHandle {
            audio: audio_tx,
            events: events_rx,
        })
    }
}

/// Map one upstream JSON frame to a relay event
fn parse_stt_frame(raw: &str) -> Option<SttEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match value.get("type").and_then(|t| t.as_str())? {
        "Results" => {
            let alternative = value
                .pointer("/channel/alternatives/0")
                .cloned()
                .unwrap_or_default();
            let text = alternative
                .get("transcript")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            let speaker = alternative
                .pointer("/words/0/speaker")
                .and_then(|s| s.as_i64());
            Some(SttEvent::Segment(TranscriptSegment {
                speaker,
                text,
                confidence: alternative.get("confidence").and_then(|c| c.as_f64()),
                is_final: value.get("is_final").and_then(|f| f.as_bool()).unwrap_or(false),
                start: value.get("start").and_then(|s| s.as_f64()).unwrap_or(0.0),
                duration: value.get("duration").and_then(|d| d.as_f64()).unwrap_or(0.0),
            }))
        }
        "UtteranceEnd" => Some(SttEvent::UtteranceEnd {
            last_word_end: value
                .get("last_word_end")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_frame() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "start": 1.5,
            "duration": 0.8,
            "channel": {
                "alternatives": [{
                    "transcript": "one two three",
                    "confidence": 0.93,
                    "words": [{"word": "one", "speaker": 0}]
                }]
            }
        }"#;
        match parse_stt_frame(raw).unwrap() {
            SttEvent::Segment(segment) => {
                assert_eq!(segment.text, "one two three");
                assert_eq!(segment.speaker, Some(0));
                assert!(segment.is_final);
                assert_eq!(segment.start, 1.5);
                assert_eq!(segment.confidence, Some(0.93));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_utterance_end_frame() {
        let raw = r#"{"type":"UtteranceEnd","last_word_end":3.4}"#;
        match parse_stt_frame(raw).unwrap() {
            SttEvent::UtteranceEnd { last_word_end } => assert_eq!(last_word_end, 3.4),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        assert!(parse_stt_frame(r#"{"type":"Metadata"}"#).is_none());
        assert!(parse_stt_frame("not json").is_none());
    }
}
