//! sqlx/Postgres implementation of `headway_core::Db`.
//!
//! Transactions opened via `begin` are kept alive in an in-memory registry
//! keyed by the opaque `TxId` handed back to the caller; every later call
//! from the engine carries that id instead of a borrowed transaction
//! reference, matching the `Db` trait's `Option<TxId>` calling convention.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use headway_core::{Error, Result, Row, TxId};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as SqlxRow, Transaction, TypeInfo};
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct PgDb {
    pool: PgPool,
    transactions: DashMap<Uuid, Arc<Mutex<Transaction<'static, Postgres>>>>,
}

impl PgDb {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transactions: DashMap::new(),
        }
    }

    fn tx_handle(&self, tx: TxId) -> Result<Arc<Mutex<Transaction<'static, Postgres>>>> {
        self.transactions
            .get(&tx.0)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::Internal(format!("unknown transaction {}", tx.0)))
    }
}

/// Bind a dynamically-typed JSON value onto a query, inferring the closest
/// Postgres representation from the JSON variant.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value.clone())),
    }
}

fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = pg_value_to_json(row, column.ordinal(), column.type_info().name());
        map.insert(name, value);
    }
    map
}

fn pg_value_to_json(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "JSONB" | "JSON" => row
            .try_get::<Option<Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "INT2" | "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" | "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::from(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl headway_core::Db for PgDb {
    async fn begin(&self) -> Result<TxId> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        let id = TxId(Uuid::new_v4());
        self.transactions.insert(id.0, Arc::new(Mutex::new(tx)));
        Ok(id)
    }

    async fn commit(&self, tx: TxId) -> Result<()> {
        let (_, handle) = self
            .transactions
            .remove(&tx.0)
            .ok_or_else(|| Error::Internal(format!("unknown transaction {}", tx.0)))?;
        let tx = Arc::try_unwrap(handle)
            .map_err(|_| Error::Internal("transaction still in use".into()))?
            .into_inner();
        tx.commit().await.map_err(|e| Error::Db(e.to_string()))
    }

    async fn rollback(&self, tx: TxId) -> Result<()> {
        let (_, handle) = self
            .transactions
            .remove(&tx.0)
            .ok_or_else(|| Error::Internal(format!("unknown transaction {}", tx.0)))?;
        let tx = Arc::try_unwrap(handle)
            .map_err(|_| Error::Internal("transaction still in use".into()))?
            .into_inner();
        tx.rollback().await.map_err(|e| Error::Db(e.to_string()))
    }

    async fn execute(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let affected = match tx {
            Some(tx) => {
                let handle = self.tx_handle(tx)?;
                let mut guard = handle.lock().await;
                query
                    .execute(&mut **guard)
                    .await
                    .map_err(|e| Error::Db(e.to_string()))?
                    .rows_affected()
            }
            None => query
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Db(e.to_string()))?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn execute_returning(
        &self,
        tx: Option<TxId>,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = match tx {
            Some(tx) => {
                let handle = self.tx_handle(tx)?;
                let mut guard = handle.lock().await;
                query
                    .fetch_optional(&mut **guard)
                    .await
                    .map_err(|e| Error::Db(e.to_string()))?
            }
            None => query
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Db(e.to_string()))?,
        };
        Ok(row.as_ref().map(row_to_map))
    }

    async fn query(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = match tx {
            Some(tx) => {
                let handle = self.tx_handle(tx)?;
                let mut guard = handle.lock().await;
                query
                    .fetch_all(&mut **guard)
                    .await
                    .map_err(|e| Error::Db(e.to_string()))?
            }
            None => query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Db(e.to_string()))?,
        };
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn apply_ddl(&self, statements: &[String]) -> Result<()> {
        for stmt in statements {
            if let Err(e) = sqlx::query(stmt).execute(&self.pool).await {
                if is_already_exists(&e) {
                    continue;
                }
                return Err(Error::Db(e.to_string()));
            }
        }
        Ok(())
    }

    async fn next_sequence_value(&self, tx: Option<TxId>, sequence: &str) -> Result<i64> {
        let sql = format!("SELECT nextval('{}')", quote_sequence(sequence));
        let row = match tx {
            Some(tx) => {
                let handle = self.tx_handle(tx)?;
                let mut guard = handle.lock().await;
                sqlx::query(&sql)
                    .fetch_one(&mut **guard)
                    .await
                    .map_err(|e| Error::Db(e.to_string()))?
            }
            None => sqlx::query(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Db(e.to_string()))?,
        };
        row.try_get::<i64, _>(0).map_err(|e| Error::Db(e.to_string()))
    }
}

fn quote_sequence(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("42P07") || db_err.code().as_deref() == Some("42710"))
}

/// Use a plain unsigned 64-bit counter for sequences the engine asks for
/// lazily (e.g. `realtime_log_seq`) that haven't been DDL'd yet.
pub async fn ensure_sequence(pool: &PgPool, sequence: &str) -> Result<()> {
    let sql = format!(
        "CREATE SEQUENCE IF NOT EXISTS \"{}\"",
        sequence.replace('"', "\"\"")
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| Error::Db(e.to_string()))?;
    Ok(())
}
