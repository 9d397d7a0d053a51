//! Configuration management for the server.
//!
//! Mirrors the structured runtime config a Headway instance is configured
//! with: `{ app, db, storage, email, kv, queue, logger, search, realtime,
//! secret, migrations }`. Loaded from the environment (with a `.env` file
//! merged in by `main.rs` via `dotenvy`), never from a process-wide global.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub url: String,
    pub base_path: String,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_url_prefix: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct KvConfig {
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub filter: String,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub ping_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub app: AppConfig,
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
    pub kv: KvConfig,
    pub queue: QueueConfig,
    pub logger: LoggerConfig,
    pub search: SearchConfig,
    pub realtime: RealtimeConfig,
    pub secret: String,
    pub migrations: MigrationsConfig,
}

fn var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = var("HOST", "0.0.0.0");
        let port = var("PORT", "3000")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let secret = env::var("HEADWAY_SECRET").map_err(|_| ConfigError::MissingSecret)?;

        Ok(Self {
            host,
            port,
            app: AppConfig {
                url: var("APP_URL", "http://localhost:3000"),
                base_path: var("APP_BASE_PATH", "/cms"),
            },
            db: DbConfig {
                url: database_url,
                max_connections: var("DB_MAX_CONNECTIONS", "10")
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS"))?,
            },
            storage: StorageConfig {
                root: PathBuf::from(var("STORAGE_ROOT", "./storage")),
                public_url_prefix: var("STORAGE_PUBLIC_URL_PREFIX", "/storage/files"),
            },
            email: EmailConfig {
                from_address: var("EMAIL_FROM", "noreply@example.com"),
            },
            kv: KvConfig {
                table: var("KV_TABLE", "kv_store"),
            },
            queue: QueueConfig {
                tick_interval_ms: var("QUEUE_TICK_INTERVAL_MS", "100")
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("QUEUE_TICK_INTERVAL_MS"))?,
            },
            logger: LoggerConfig {
                filter: var("RUST_LOG", "headway_server=debug,tower_http=debug"),
            },
            search: SearchConfig {
                index_dir: PathBuf::from(var("SEARCH_INDEX_DIR", "./search-index")),
            },
            realtime: RealtimeConfig {
                ping_interval_seconds: var("REALTIME_PING_INTERVAL_SECONDS", "25")
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("REALTIME_PING_INTERVAL_SECONDS"))?,
            },
            secret,
            migrations: MigrationsConfig {
                directory: PathBuf::from(var("MIGRATIONS_DIR", "./migrations")),
            },
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("HEADWAY_SECRET environment variable is required")]
    MissingSecret,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}
