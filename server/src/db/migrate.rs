//! Migration runner.
//!
//! Maintains the `migrations` bookkeeping table and applies the
//! `MigrationFile`s the core's generator produces, each in its own
//! transaction. Loads migration files from `config.migrations.directory`;
//! every file is `<14-digit timestamp>_<name>.json` holding
//! `headway_core::migration::MigrationFile`.

use std::path::Path;

use headway_core::migration::{generate_migration, snapshot_schema, MigrationFile};
use headway_core::Schema;
use sqlx::PgPool;

use crate::error::{AppError, Result};

/// Write the `init` migration (empty schema -> the embedder's current
/// schema) if the migrations directory has nothing in it yet. Real schema
/// evolution after that point is expected to add further migration files
/// through the generator, not by editing this one.
pub fn write_initial_migration_if_missing(schema: &Schema, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AppError::Internal(e.to_string()))?;
    let has_existing = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if has_existing {
        return Ok(());
    }

    let prev = snapshot_schema(&Schema::default());
    let curr = snapshot_schema(schema);
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    let Some(migration) = generate_migration(&prev, &curr, &timestamp, "init") else {
        return Ok(());
    };

    let path = dir.join(format!("{}.json", migration.id));
    let raw = serde_json::to_string_pretty(&migration).map_err(|e| AppError::Internal(e.to_string()))?;
    std::fs::write(&path, raw).map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(path = %path.display(), "wrote initial migration");
    Ok(())
}

const BOOKKEEPING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    id TEXT PRIMARY KEY,
    batch INT NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ExecutedMigration {
    id: String,
    batch: i32,
}

pub struct MigrationRunner<'a> {
    pool: &'a PgPool,
    directory: &'a Path,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub executed: Vec<String>,
    pub pending: Vec<String>,
    pub current_batch: i32,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(pool: &'a PgPool, directory: &'a Path) -> Self {
        Self { pool, directory }
    }

    async fn ensure_bookkeeping(&self) -> Result<()> {
        sqlx::query(BOOKKEEPING_DDL).execute(self.pool).await?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<MigrationFile>> {
        let mut files = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.directory) else {
            return Ok(files);
        };
        let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AppError::Internal(format!("reading migration {path:?}: {e}")))?;
            let file: MigrationFile = serde_json::from_str(&raw)
                .map_err(|e| AppError::Internal(format!("parsing migration {path:?}: {e}")))?;
            files.push(file);
        }
        Ok(files)
    }

    async fn executed(&self) -> Result<Vec<ExecutedMigration>> {
        let rows: Vec<ExecutedMigration> =
            sqlx::query_as("SELECT id, batch FROM migrations ORDER BY id ASC")
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    /// Apply all pending migrations (optionally stopping at `target`,
    /// inclusive), each in its own transaction, under the next batch number.
    pub async fn up(&self, target: Option<&str>) -> Result<MigrationStatus> {
        self.ensure_bookkeeping().await?;
        let all = self.load_all()?;
        let executed = self.executed().await?;
        let executed_ids: std::collections::HashSet<_> =
            executed.iter().map(|m| m.id.clone()).collect();
        let next_batch = executed.iter().map(|m| m.batch).max().unwrap_or(0) + 1;

        for migration in &all {
            if executed_ids.contains(&migration.id) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for stmt in &migration.up {
                sqlx::query(stmt).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO migrations (id, batch) VALUES ($1, $2)")
                .bind(&migration.id)
                .bind(next_batch)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(migration = %migration.id, batch = next_batch, "applied migration");
            if Some(migration.id.as_str()) == target {
                break;
            }
        }
        self.status().await
    }

    /// Roll back the highest batch (or the given batch number), in reverse
    /// filename order.
    pub async fn down(&self, batch: Option<i32>) -> Result<MigrationStatus> {
        self.ensure_bookkeeping().await?;
        let executed = self.executed().await?;
        let target_batch = match batch {
            Some(b) => b,
            None => match executed.iter().map(|m| m.batch).max() {
                Some(b) => b,
                None => return self.status().await,
            },
        };
        let all = self.load_all()?;
        let mut to_revert: Vec<_> = executed
            .iter()
            .filter(|m| m.batch == target_batch)
            .map(|m| m.id.clone())
            .collect();
        to_revert.sort();
        to_revert.reverse();

        for id in to_revert {
            let Some(migration) = all.iter().find(|m| m.id == id) else {
                tracing::warn!(migration = %id, "migration file missing, skipping rollback");
                continue;
            };
            let mut tx = self.pool.begin().await?;
            for stmt in &migration.down {
                sqlx::query(stmt).execute(&mut *tx).await?;
            }
            sqlx::query("DELETE FROM migrations WHERE id = $1")
                .bind(&migration.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(migration = %migration.id, "reverted migration");
        }
        self.status().await
    }

    /// Roll back repeatedly until (and including) `id` is undone.
    pub async fn down_to(&self, id: &str) -> Result<MigrationStatus> {
        loop {
            let executed = self.executed().await?;
            if !executed.iter().any(|m| m.id == id) {
                break;
            }
            let highest_batch = executed.iter().map(|m| m.batch).max();
            self.down(highest_batch).await?;
        }
        self.status().await
    }

    /// Roll back every applied migration.
    pub async fn reset(&self) -> Result<MigrationStatus> {
        loop {
            let executed = self.executed().await?;
            let Some(highest) = executed.iter().map(|m| m.batch).max() else {
                break;
            };
            self.down(Some(highest)).await?;
        }
        self.status().await
    }

    /// `reset()` followed by `up()`.
    pub async fn fresh(&self) -> Result<MigrationStatus> {
        self.reset().await?;
        self.up(None).await
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ensure_bookkeeping().await?;
        let executed = self.executed().await?;
        let all = self.load_all()?;
        let executed_ids: std::collections::HashSet<_> =
            executed.iter().map(|m| m.id.clone()).collect();
        let pending = all
            .iter()
            .filter(|m| !executed_ids.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();
        Ok(MigrationStatus {
            current_batch: executed.iter().map(|m| m.batch).max().unwrap_or(0),
            executed: executed.into_iter().map(|m| m.id).collect(),
            pending,
        })
    }
}

/// Idempotent adapter-supplied extensions and system tables, applied
/// before user migrations: the `pgcrypto` extension, the append-only
/// `realtime_log` table the CRUD engine writes to on every mutation, and
/// its backing sequence.
pub async fn apply_extensions(pool: &PgPool) -> Result<()> {
    sqlx::query(r#"CREATE EXTENSION IF NOT EXISTS "pgcrypto""#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE SEQUENCE IF NOT EXISTS "realtime_log_seq""#)
        .execute(pool)
        .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS "realtime_log" (
            "seq" BIGINT PRIMARY KEY,
            "resourceType" TEXT NOT NULL,
            "resource" TEXT NOT NULL,
            "operation" TEXT NOT NULL,
            "recordId" TEXT,
            "locale" TEXT,
            "payload" JSONB NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
