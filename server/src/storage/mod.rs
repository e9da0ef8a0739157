//! Persistence layer: pool management, migrations, repositories, models
//!
//! Four tables back the engine: submissions, jobs, stream sessions, and
//! stream chunks. All writers go through the repositories in this module.

pub mod database;
pub mod models;
pub mod repositories;

// Flatten the most-used types into storage::
pub use database::{DatabaseHealthInfo, DatabaseManager, DatabasePool};
pub use models::*;
pub use repositories::*;
