//! Postgres-table-backed `Kv` adapter. Used for the search-indexing
//! debounce markers and other ephemeral state that doesn't belong in the
//! relational content tables.

use async_trait::async_trait;
use chrono::Utc;
use headway_core::{Error, Result};
use sqlx::PgPool;

pub struct PgKv {
    pool: PgPool,
    table: String,
}

impl PgKv {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (
                key TEXT PRIMARY KEY,
                value BYTEA NOT NULL,
                expires_at TIMESTAMPTZ
            )"#,
            self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl headway_core::Kv for PgKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let sql = format!(
            r#"SELECT value FROM "{}" WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())"#,
            self.table
        );
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(row.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<()> {
        let expires_at = ttl_seconds.map(|s| Utc::now() + chrono::Duration::seconds(s as i64));
        let sql = format!(
            r#"INSERT INTO "{}" (key, value, expires_at) VALUES ($1, $2, $3)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at"#,
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let sql = format!(r#"DELETE FROM "{}" WHERE key = $1"#, self.table);
        sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<bool> {
        let expires_at = ttl_seconds.map(|s| Utc::now() + chrono::Duration::seconds(s as i64));
        let sql = format!(
            r#"INSERT INTO "{}" (key, value, expires_at) VALUES ($1, $2, $3)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
               WHERE "{}".expires_at IS NOT NULL AND "{}".expires_at <= now()
               RETURNING key"#,
            self.table, self.table, self.table
        );
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        if row.is_some() {
            return Ok(true);
        }
        let insert_sql = format!(
            r#"INSERT INTO "{}" (key, value, expires_at) VALUES ($1, $2, $3)
               ON CONFLICT (key) DO NOTHING RETURNING key"#,
            self.table
        );
        let inserted: Option<(String,)> = sqlx::query_as(&insert_sql)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        Ok(inserted.is_some())
    }
}
