//! SQLite-based persistence store

use crate::core::{PipelineDefinition, RunStatus};
use crate::persistence::{PersistenceBackend, RunRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, pipeline_id, pipeline_name, goal, status, progress, current_agent, \
     completed_nodes, total_nodes, started_at, finished_at, error, outputs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) the database at `db_path`; `:memory:` keeps it in memory
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:";
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // Every pooled connection to :memory: would open its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("storyflow");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        Self::new(&db_path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                pipeline_name TEXT NOT NULL,
                goal TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                current_agent TEXT,
                completed_nodes INTEGER NOT NULL DEFAULT 0,
                total_nodes INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error TEXT,
                outputs TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_id ON runs(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn record_from_row(row: &SqliteRow) -> Result<RunRecord> {
        let status: String = row.try_get("status")?;
        let outputs: String = row.try_get("outputs")?;

        Ok(RunRecord {
            run_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            pipeline_id: row.try_get("pipeline_id")?,
            pipeline_name: row.try_get("pipeline_name")?,
            goal: row.try_get("goal")?,
            status: RunStatus::parse(&status)
                .with_context(|| format!("Unknown run status '{}'", status))?,
            progress: row.try_get::<i64, _>("progress")?.clamp(0, 100) as u8,
            current_agent: row.try_get("current_agent")?,
            completed_nodes: row.try_get::<i64, _>("completed_nodes")? as usize,
            total_nodes: row.try_get::<i64, _>("total_nodes")? as usize,
            started_at: Self::from_naive(row.try_get("started_at")?),
            finished_at: row
                .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                .map(Self::from_naive),
            error: row.try_get("error")?,
            outputs: serde_json::from_str(&outputs).context("Corrupt outputs column")?,
        })
    }

    fn pipeline_from_row(row: &SqliteRow) -> Result<PipelineDefinition> {
        let definition: String = row.try_get("definition")?;
        serde_json::from_str(&definition).context("Corrupt pipeline definition")
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_id, pipeline_name, goal, status, progress, current_agent,
             completed_nodes, total_nodes, started_at, finished_at, error, outputs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.pipeline_id)
        .bind(&record.pipeline_name)
        .bind(&record.goal)
        .bind(record.status.as_str())
        .bind(record.progress as i64)
        .bind(&record.current_agent)
        .bind(record.completed_nodes as i64)
        .bind(record.total_nodes as i64)
        .bind(Self::to_naive(record.started_at))
        .bind(record.finished_at.map(Self::to_naive))
        .bind(&record.error)
        .bind(serde_json::to_string(&record.outputs)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?1",
            RUN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_pipeline_runs(&self, pipeline_id: &str) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_id = ?1 ORDER BY started_at DESC",
            RUN_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipeline runs")?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn save_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pipelines (id, name, definition, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(serde_json::to_string(pipeline)?)
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline")?;

        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineDefinition>> {
        let row = sqlx::query("SELECT definition FROM pipelines WHERE id = ?1")
            .bind(pipeline_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        row.as_ref().map(Self::pipeline_from_row).transpose()
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>> {
        let rows = sqlx::query("SELECT definition FROM pipelines ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        rows.iter().map(Self::pipeline_from_row).collect()
    }
}
