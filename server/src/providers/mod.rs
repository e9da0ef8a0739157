//! Inference provider abstraction and implementations

pub mod client;
pub mod local;
pub mod types;

pub use client::{HeartbeatSink, InferenceProvider, ProviderRegistry};
pub use local::LocalProvider;
pub use types::{AnalysisOutput, SummaryOutput, TranscriptOutput};
