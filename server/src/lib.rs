//! scribed: audio inference orchestration
//!
//! A persistent job queue with single-worker serialization, heartbeat-based
//! stuck-job recovery, auto-chained transcribe/summarize pipelines, and a
//! real-time streaming hub bridging one audio broadcaster to many viewers.

pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod providers;
pub mod server;
pub mod storage;
pub mod stream;
