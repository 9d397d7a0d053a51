//! Job queue abstraction. The core defines the
//! contract and the declarative job shape; the in-process adapter backed
//! by `tokio`/`tokio-cron-scheduler` lives in the server crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::hooks::HookFuture;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobOptions {
    pub priority: Option<i32>,
    pub retry_limit: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub retry_backoff: Option<bool>,
    pub expire_in_seconds: Option<u64>,
    pub start_after: Option<chrono::DateTime<chrono::Utc>>,
    pub cron: Option<String>,
}

pub type JobHandler = Arc<dyn Fn(Value, JobContext) -> HookFuture<()> + Send + Sync>;

/// Validates a job payload ahead of dispatch. Returning `Err` nacks the job
/// without ever invoking its handler.
pub type JobValidator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    pub attempt: u32,
}

/// A declarative job: a name, an optional payload validator, and a handler.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub schema: Option<JobValidator>,
    pub handler: JobHandler,
    pub options: JobOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCapabilities {
    pub long_running_consumer: bool,
    pub run_once_consumer: bool,
    pub push_consumer: bool,
    pub scheduling: bool,
    pub singleton: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunOnceReport {
    pub processed: u64,
}

/// Adapter contract a queue backend implements. `listen` is intentionally
/// not part of this trait: it is long-running and owns its own task/loop,
/// so the server's in-process adapter exposes it as an inherent method
/// rather than an object-safe trait method.
#[async_trait]
pub trait Queue: Send + Sync {
    fn capabilities(&self) -> QueueCapabilities;

    /// Enqueue a single job invocation; returns an adapter-assigned id
    /// when the backend supports tracking individual jobs.
    async fn publish(&self, name: &str, payload: Value, opts: JobOptions) -> Result<Option<String>>;

    async fn schedule(&self, name: &str, payload: Value, cron: &str, opts: JobOptions) -> Result<()>;

    async fn unschedule(&self, name: &str) -> Result<()>;

    /// Process one bounded batch against the given handlers (serverless /
    /// cron-tick mode) and report how many jobs ran.
    async fn run_once(&self, handlers: &[JobDefinition]) -> Result<RunOnceReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_options_default_has_no_schedule() {
        let opts = JobOptions::default();
        assert!(opts.cron.is_none());
        assert!(opts.retry_limit.is_none());
    }
}
