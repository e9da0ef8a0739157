//! SQLite pool setup and schema migrations

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Shared handle to the SQLite connection pool
pub type DatabasePool = Pool<Sqlite>;

/// Schema versions, applied in order and tracked in `schema_migrations`
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_core_schema",
    include_str!("migrations/0001_core_schema.sql"),
)];

/// Owner of the SQLite pool; everything else borrows pool clones
pub struct DatabaseManager {
    pool: DatabasePool,
    database_path: String,
}

impl DatabaseManager {
    /// Open (creating if necessary) the database and bring the schema up
    /// to date
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let database_path = config.path.to_string_lossy().to_string();

        info!("Opening database {}", database_path);

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::database(format!("data directory is unusable: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::database(format!("cannot open {database_path}: {e}")))?;

        let manager = Self {
            pool,
            database_path,
        };
        manager.run_migrations().await?;

        Ok(manager)
    }

    /// Apply any schema migrations that have not run yet
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(format!("migration bookkeeping unavailable: {e}")))?;

        for (name, sql) in MIGRATIONS {
            self.apply_migration(name, sql).await?;
        }
        Ok(())
    }

    async fn apply_migration(&self, name: &str, sql: &str) -> Result<()> {
        let seen = sqlx::query("SELECT 1 FROM schema_migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(format!("migration lookup for '{name}': {e}")))?;
        if seen.is_some() {
            debug!("Schema migration '{}' already in place", name);
            return Ok(());
        }

        info!("Applying schema migration '{}'", name);

        // One statement per prepare; the schema files separate them with ';'
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::database(format!("migration '{name}' broke mid-way: {e}")))?;
        }

        sqlx::query("INSERT INTO schema_migrations (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(format!("marking migration '{name}' applied: {e}")))?;

        Ok(())
    }

    /// Pool handle for repositories to clone
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Where the database file lives on disk
    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    /// Probe connectivity and gather the numbers the health route reports
    pub async fn health_check(&self) -> Result<DatabaseHealthInfo> {
        let probe_started = std::time::Instant::now();
        let counts = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM audio_submissions) AS submissions,
                (SELECT COUNT(*) FROM jobs) AS jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::database(format!("health probe got no answer: {e}")))?;
        let connectivity_time = probe_started.elapsed();

        let file_size = tokio::fs::metadata(Path::new(&self.database_path))
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(DatabaseHealthInfo {
            connected: true,
            connectivity_time_ms: connectivity_time.as_millis() as u64,
            file_size_bytes: file_size,
            pool_size: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            submission_count: counts.get("submissions"),
            job_count: counts.get("jobs"),
        })
    }

    /// Whether the schema contains the named table
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(format!("schema lookup for '{table_name}': {e}")))?;
        Ok(row.is_some())
    }

    /// Shut the pool down; outstanding borrowed connections finish first
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}

/// Snapshot returned by the health probe
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseHealthInfo {
    pub connected: bool,
    pub connectivity_time_ms: u64,
    pub file_size_bytes: u64,
    pub pool_size: u32,
    pub idle_connections: usize,
    pub submission_count: i64,
    pub job_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig {
            path: dir.path().join("test.db"),
            max_connections: 5,
        }
    }

    #[tokio::test]
    async fn test_database_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&test_config(&temp_dir)).await.unwrap();
        assert!(manager.database_path().contains("test.db"));
    }

    #[tokio::test]
    async fn test_tables_created_by_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&test_config(&temp_dir)).await.unwrap();

        for table in ["audio_submissions", "jobs", "stream_sessions", "stream_chunks"] {
            assert!(manager.table_exists(table).await.unwrap(), "missing {table}");
        }
        assert!(!manager.table_exists("no_such_table").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&test_config(&temp_dir)).await.unwrap();
        manager.run_migrations().await.unwrap();
        manager.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&test_config(&temp_dir)).await.unwrap();

        let health = manager.health_check().await.unwrap();
        assert!(health.connected);
        assert_eq!(health.submission_count, 0);
        assert_eq!(health.job_count, 0);
    }
}
