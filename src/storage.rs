//! SQLite storage layer for TTIScan.
//!
//! Two tables back the persistence collaborators the core relies on:
//!
//! - `calibration_profiles`: every profile ever saved, at most one flagged
//!   active. The full profile is kept as its JSON document.
//! - `analysis_results`: append-only classification history, read back
//!   newest first. The classifier never reads from it.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::model::{AnalysisResult, CalibrationProfile};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:ttiscan.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calibration_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                document TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                state TEXT NOT NULL,
                confidence REAL NOT NULL,
                profile_id TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for reverse-chronological history listing
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_analysis_results_ts
            ON analysis_results(ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a profile, optionally marking it as the only active one.
    ///
    /// Saving an id that already exists overwrites that row instead of
    /// duplicating it. Runs in one transaction so there is never a moment
    /// with two active rows.
    pub async fn save_profile(
        &self,
        profile: &CalibrationProfile,
        active: bool,
    ) -> anyhow::Result<()> {
        let document = serde_json::to_string(profile)?;
        let mut tx = self.pool.begin().await?;

        if active {
            sqlx::query("UPDATE calibration_profiles SET active = 0 WHERE active = 1")
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO calibration_profiles (id, name, source, created_at, document, active)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                source = excluded.source,
                created_at = excluded.created_at,
                document = excluded.document,
                active = excluded.active
            "#,
        )
        .bind(profile.id().to_string())
        .bind(profile.name())
        .bind(profile.source().as_str())
        .bind(profile.created_at().timestamp_millis())
        .bind(document)
        .bind(active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Flag a stored profile as active. Returns `false` if the id is unknown.
    pub async fn set_active(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM calibration_profiles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if !exists {
            return Ok(false);
        }

        sqlx::query("UPDATE calibration_profiles SET active = (id = ?)")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(true)
    }

    /// The profile currently flagged active, if any.
    pub async fn load_active_profile(&self) -> anyhow::Result<Option<CalibrationProfile>> {
        let row = sqlx::query(
            r#"
            SELECT document FROM calibration_profiles
            WHERE active = 1
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_profile(r.get("document"))).transpose()
    }

    /// All stored profiles, oldest first, with their active flag.
    pub async fn load_profiles(&self) -> anyhow::Result<Vec<(CalibrationProfile, bool)>> {
        let rows = sqlx::query(
            r#"
            SELECT document, active FROM calibration_profiles
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| Ok((parse_profile(r.get("document"))?, r.get::<bool, _>("active"))))
            .collect()
    }

    /// Append a classification to history. Returns its row id.
    pub async fn append_result(&self, result: &AnalysisResult) -> anyhow::Result<i64> {
        let payload = serde_json::to_string(result)?;

        let done = sqlx::query(
            r#"
            INSERT INTO analysis_results (ts, state, confidence, profile_id, payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.timestamp.timestamp_millis())
        .bind(result.label.as_str())
        .bind(result.confidence)
        .bind(result.profile_id.to_string())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(done.last_insert_rowid())
    }

    /// Most recent results first, at most `limit` of them.
    pub async fn list_results(&self, limit: u32) -> anyhow::Result<Vec<AnalysisResult>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM analysis_results
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| Ok(serde_json::from_str(r.get::<&str, _>("payload"))?))
            .collect()
    }

    /// Total number of recorded results.
    pub async fn count_results(&self) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM analysis_results")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("total"))
    }
}

fn parse_profile(document: &str) -> anyhow::Result<CalibrationProfile> {
    Ok(serde_json::from_str(document)?)
}
