//! The abstract relational store contract.
//!
//! `Db` is deliberately low-level: parameterised SQL execution plus
//! transaction lifecycle and DDL application. The CRUD engine (`crud.rs`)
//! builds CMS-specific SQL against this contract; `Db` itself knows
//! nothing about collections, fields or versions. The sqlx/Postgres
//! implementation lives in the server crate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::TxId;
use crate::error::Result;

/// A single result row, keyed by column name. Plain data so `headway-core`
/// never needs a concrete driver's row type.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait Db: Send + Sync {
    /// Open a new transaction, returning its handle.
    async fn begin(&self) -> Result<TxId>;
    async fn commit(&self, tx: TxId) -> Result<()>;
    async fn rollback(&self, tx: TxId) -> Result<()>;

    /// Execute a mutating statement, returning affected row count.
    async fn execute(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a statement and return a single generated/returned column
    /// (e.g. `RETURNING id`), used by inserts that need the new row's id.
    async fn execute_returning(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<Option<Row>>;

    /// Run a read query, returning every matching row.
    async fn query(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a read query expected to return at most one row.
    async fn query_one(&self, tx: Option<TxId>, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(tx, sql, params).await?.into_iter().next())
    }

    /// Apply idempotent DDL statements (table/index creation, extensions).
    /// Used by the migration runner and by adapter-supplied extensions.
    async fn apply_ddl(&self, statements: &[String]) -> Result<()>;

    /// The next value of a named monotonic sequence (used for the realtime
    /// log's `seq` and, where the driver lacks native `RETURNING`, for
    /// version numbers).
    async fn next_sequence_value(&self, tx: Option<TxId>, sequence: &str) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory `Db` used by `crud.rs`'s unit tests: a single table of
    /// untyped rows keyed by an incrementing id, enough to exercise SQL the
    /// CRUD engine assembles without a real Postgres connection.
    #[derive(Default)]
    pub struct MemoryDb {
        pub executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Db for MemoryDb {
        async fn begin(&self) -> Result<TxId> {
            Ok(TxId(uuid::Uuid::new_v4()))
        }
        async fn commit(&self, _tx: TxId) -> Result<()> {
            Ok(())
        }
        async fn rollback(&self, _tx: TxId) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _tx: Option<TxId>, sql: &str, _params: &[Value]) -> Result<u64> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(1)
        }
        async fn execute_returning(
            &self,
            _tx: Option<TxId>,
            sql: &str,
            _params: &[Value],
        ) -> Result<Option<Row>> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(None)
        }
        async fn query(&self, _tx: Option<TxId>, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(Vec::new())
        }
        async fn apply_ddl(&self, _statements: &[String]) -> Result<()> {
            Ok(())
        }
        async fn next_sequence_value(&self, _tx: Option<TxId>, _sequence: &str) -> Result<i64> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn memory_db_records_executed_statements() {
        let db = MemoryDb::default();
        db.execute(None, "SELECT 1", &[]).await.unwrap();
        assert_eq!(db.executed.lock().unwrap().len(), 1);
    }
}
