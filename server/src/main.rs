//! Headway Server - the reference embedding of `headway-core`: an HTTP
//! surface over the schema-driven CMS engine, backed by Postgres, a
//! filesystem blob store, an in-process job queue and a tantivy search
//! index.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod kv;
mod mailer;
mod queue;
mod realtime;
mod routes;
mod schema;
mod search;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use headway_core::{Auth, CrudEngine, Db, GlobalHooks, Kv, Mailer, Queue, Schema, Storage};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::SecretAuth;
use crate::config::Config;
use crate::db::{Pool, PgDb};
use crate::kv::PgKv;
use crate::mailer::LogMailer;
use crate::queue::InProcessQueue;
use crate::realtime::RealtimeDispatcher;
use crate::search::TantivySearch;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Pool,
    pub schema: Arc<Schema>,
    pub crud: Arc<CrudEngine>,
    pub storage: Arc<dyn Storage>,
    pub kv: Arc<dyn Kv>,
    pub mailer: Arc<dyn Mailer>,
    pub queue: Arc<InProcessQueue>,
    pub search: Arc<TantivySearch>,
    pub auth: Arc<dyn Auth>,
    pub realtime: Arc<RealtimeDispatcher>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&config.logger.filter).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("headway_server=debug,tower_http=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting headway server on {}:{}", config.host, config.port);

    let pool = db::create_pool(&config.db.url, config.db.max_connections).await?;

    db::apply_extensions(&pool).await?;

    let schema = Arc::new(schema::bootstrap()?);

    db::write_initial_migration_if_missing(&schema, &config.migrations.directory)?;
    let runner = db::MigrationRunner::new(&pool, &config.migrations.directory);
    runner.up(None).await?;

    let pg_db = Arc::new(PgDb::new(pool.clone()));
    let pg_kv = Arc::new(PgKv::new(pool.clone(), config.kv.table.clone()));
    pg_kv.ensure_table().await?;

    let in_process_queue = Arc::new(InProcessQueue::new().await?);

    let tantivy_search = Arc::new(TantivySearch::open_or_create(&config.search.index_dir)?);

    let fs_storage: Arc<dyn Storage> = Arc::new(storage::FsStorage::new(config.storage.root.clone()));
    let log_mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(config.email.from_address.clone()));
    let secret_auth: Arc<dyn Auth> = Arc::new(SecretAuth::new(config.secret.clone()));

    let crud = Arc::new(CrudEngine {
        schema: schema.clone(),
        db: pg_db.clone() as Arc<dyn Db>,
        global_hooks: Arc::new(GlobalHooks::default()),
        queue: Some(in_process_queue.clone() as Arc<dyn Queue>),
    });

    let realtime_dispatcher = RealtimeDispatcher::new(pool.clone(), crud.clone());
    tokio::spawn(realtime::run_poll_loop(
        realtime_dispatcher.clone(),
        Duration::from_millis(200),
    ));

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        pool,
        schema,
        crud,
        storage: fs_storage,
        kv: pg_kv,
        mailer: log_mailer,
        queue: in_process_queue,
        search: tantivy_search,
        auth: secret_auth,
        realtime: realtime_dispatcher,
    };

    let app = Router::new()
        .nest(&config.app.base_path, routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
