//! Database module: connection pool, the Postgres `Db` adapter, and the
//! migration runner.

mod migrate;
mod pool;
mod postgres;

pub use migrate::{apply_extensions, write_initial_migration_if_missing, MigrationRunner, MigrationStatus};
pub use pool::{create_pool, Pool};
pub use postgres::{ensure_sequence, PgDb};
