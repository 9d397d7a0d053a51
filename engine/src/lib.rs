//! # Headway Core
//!
//! The schema-driven data-plane engine behind Headway, a headless CMS
//! runtime embeddable in any Rust service.
//!
//! This crate owns schema compilation, the query compiler, the CRUD
//! protocol, and the abstract adapter traits (`Db`, `Queue`, `Storage`,
//! `Kv`, `Mailer`, `Search`, `Auth`) a host application implements. It has
//! no concrete IO of its own: every side effect is dispatched through one
//! of those traits, which the `headway-server` crate (or any embedding
//! application) supplies.
//!
//! ## Design principles
//!
//! - **Adapter-agnostic**: every external effect goes through a trait
//!   defined here; this crate never opens a socket or a file.
//! - **Schema first**: [`schema::Schema`] compiles collection/global
//!   definitions once; the CRUD engine and query compiler both operate
//!   against the compiled form, never the raw field list.
//! - **Explicit transactions**: there is no task-local transaction slot;
//!   [`context::AppContext`] carries the active transaction explicitly
//!   through every call (see `context` module docs).
//!
//! ## Quick start
//!
//! ```rust
//! use headway_core::{CollectionSchema, FieldDef, FieldType, Schema};
//!
//! let mut schema = Schema::new();
//! let posts = CollectionSchema::new(
//!     "posts",
//!     vec![
//!         FieldDef::new("title", FieldType::Text).required(),
//!         FieldDef::new("body", FieldType::RichText).localized(),
//!     ],
//! );
//! schema.add_collection(posts).unwrap();
//! assert!(schema.collection("posts").is_ok());
//! ```

pub mod access;
pub mod auth;
pub mod context;
pub mod crud;
pub mod db;
pub mod error;
pub mod field;
pub mod hooks;
pub mod job;
pub mod kv;
pub mod localization;
pub mod mailer;
pub mod migration;
pub mod query;
pub mod realtime;
pub mod record;
pub mod schema;
pub mod search;
pub mod storage;

pub use access::{AccessDecision, AccessRule, AccessRules};
pub use auth::Auth;
pub use context::{AppContext, SessionInfo, TransactionState, TxId};
pub use crud::{CrudEngine, FindOptions};
pub use db::{Db, Row};
pub use error::{Error, ErrorKind, FieldError, Result};
pub use field::{ColumnSpec, FieldConfig, FieldDef, FieldMeta, FieldType, RelationKind};
pub use hooks::{GlobalHooks, HookContext, HookFuture, HookSet, OperationKind, TransitionContext};
pub use job::{JobContext, JobDefinition, JobHandler, JobOptions, JobValidator, Queue, QueueCapabilities, RunOnceReport};
pub use kv::Kv;
pub use localization::LocSchema;
pub use mailer::{Email, Mailer};
pub use migration::{generate_migration, snapshot_schema, MigrationFile, SchemaOp, SchemaSnapshot};
pub use query::{CompiledWhere, OrderBy, Pagination, Predicate, Where};
pub use realtime::{RealtimeLogEntry, RefreshGate, ResourceType, SseEvent, Topic};
pub use record::{FindResult, Record, VersionOperation, VersionRecord};
pub use schema::{CollectionOptions, CollectionSchema, GlobalSchema, IndexSpec, Schema, SearchableConfig, WorkflowConfig};
pub use search::{Search, SearchDocument, SearchHit, SearchQuery, SearchResults};
pub use storage::{Storage, StoredFile};

/// Type aliases for clarity at call sites.
pub type CollectionName = String;
pub type RecordId = String;
pub type Locale = String;
