//! Typed registries over the shared pool

pub mod chunk;
pub mod job;
pub mod submission;

// Surface the registries at the module root
pub use chunk::ChunkRepository;
pub use job::JobRepository;
pub use submission::SubmissionRepository;
