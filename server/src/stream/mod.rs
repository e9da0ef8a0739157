//! Live streaming: hub, utterance accumulation, STT relay, audio sink

pub mod hub;
pub mod segments;
pub mod stt;
pub mod wav;

pub use hub::{BroadcasterConn, ChunkPayload, StreamEvent, StreamHub, StreamSettings};
pub use segments::{ChunkDraft, SegmentAccumulator};
pub use stt::{SttConnector, SttEvent, SttHandle, SttOptions, TranscriptSegment, WsSttConnector};
pub use wav::WavSink;
