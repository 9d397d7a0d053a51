//! In-process job queue adapter, backed by `tokio-cron-scheduler` for
//! `schedule`d jobs and a `DashMap`-guarded in-memory queue for immediate
//! `publish`, using the same `DashMap`-registry-behind-an-`Arc` shape as
//! the realtime subscription dispatcher.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use headway_core::{Error, JobDefinition, JobOptions, QueueCapabilities, Result, RunOnceReport};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QueuedJob {
    id: String,
    name: String,
    payload: Value,
    attempt: u32,
    opts: JobOptions,
}

pub struct InProcessQueue {
    pending: Arc<Mutex<VecDeque<QueuedJob>>>,
    scheduled: DashMap<String, uuid::Uuid>,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl InProcessQueue {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        scheduler.start().await.map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            scheduled: DashMap::new(),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Long-running consumer loop (§4.7 `listen`): ticks `run_once` against
    /// `handlers` until `shutdown` resolves, waiting up to
    /// `shutdown_timeout` for the in-flight batch to drain.
    pub async fn listen(
        &self,
        handlers: &[JobDefinition],
        tick_interval: Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("job queue listener shutting down");
                    break;
                }
                _ = tokio::time::sleep(tick_interval) => {
                    if let Err(err) = self.run_once(handlers).await {
                        tracing::error!(error = %err, "job queue tick failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl headway_core::Queue for InProcessQueue {
    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities {
            long_running_consumer: true,
            run_once_consumer: true,
            push_consumer: false,
            scheduling: true,
            singleton: true,
        }
    }

    async fn publish(&self, name: &str, payload: Value, opts: JobOptions) -> Result<Option<String>> {
        let id = Uuid::new_v4().to_string();
        let job = QueuedJob {
            id: id.clone(),
            name: name.to_string(),
            payload,
            attempt: 0,
            opts: opts.clone(),
        };

        match opts.start_after {
            Some(start_after) if start_after > chrono::Utc::now() => {
                let pending = self.pending.clone();
                let delay = (start_after - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    pending.lock().await.push_back(job);
                });
            }
            _ => {
                self.pending.lock().await.push_back(job);
            }
        }
        Ok(Some(id))
    }

    async fn schedule(&self, name: &str, payload: Value, cron: &str, opts: JobOptions) -> Result<()> {
        let pending = self.pending.clone();
        let job_name = name.to_string();
        let job_opts = opts.clone();
        let cron_job = CronJob::new_async(cron, move |_uuid, _locked| {
            let pending = pending.clone();
            let name = job_name.clone();
            let payload = payload.clone();
            let opts = job_opts.clone();
            Box::pin(async move {
                pending.lock().await.push_back(QueuedJob {
                    id: Uuid::new_v4().to_string(),
                    name,
                    payload,
                    attempt: 0,
                    opts,
                });
            })
        })
        .map_err(|e| Error::Internal(e.to_string()))?;

        let mut guard = self.scheduler.lock().await;
        let scheduler = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("scheduler not running".into()))?;
        let job_id = scheduler
            .add(cron_job)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        self.scheduled.insert(name.to_string(), job_id);
        Ok(())
    }

    async fn unschedule(&self, name: &str) -> Result<()> {
        if let Some((_, job_id)) = self.scheduled.remove(name) {
            let mut guard = self.scheduler.lock().await;
            if let Some(scheduler) = guard.as_mut() {
                scheduler
                    .remove(&job_id)
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn run_once(&self, handlers: &[JobDefinition]) -> Result<RunOnceReport> {
        const BATCH_SIZE: usize = 50;
        let mut processed = 0u64;
        for _ in 0..BATCH_SIZE {
            let job = {
                let mut pending = self.pending.lock().await;
                pending.pop_front()
            };
            let Some(mut job) = job else { break };

            let Some(def) = handlers.iter().find(|h| h.name == job.name) else {
                tracing::warn!(job = %job.name, "no handler registered for job");
                continue;
            };

            if let Some(validator) = &def.schema {
                if let Err(err) = validator(&job.payload) {
                    tracing::error!(job = %job.name, error = %err, "job payload failed validation, dropping");
                    continue;
                }
            }

            let ctx = headway_core::JobContext {
                job_name: job.name.clone(),
                attempt: job.attempt,
            };
            match (def.handler)(job.payload.clone(), ctx).await {
                Ok(()) => {
                    processed += 1;
                }
                Err(err) => {
                    let retry_limit = job.opts.retry_limit.unwrap_or(0);
                    job.attempt += 1;
                    if job.attempt <= retry_limit {
                        tracing::warn!(job = %job.name, attempt = job.attempt, error = %err, "job failed, retrying");
                        let delay = job
                            .opts
                            .retry_delay_seconds
                            .map(Duration::from_secs)
                            .unwrap_or_default();
                        let pending = self.pending.clone();
                        let requeue = job.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            pending.lock().await.push_back(requeue);
                        });
                    } else {
                        tracing::error!(job = %job.name, error = %err, "job exhausted retries, dropping");
                    }
                }
            }
        }
        Ok(RunOnceReport { processed })
    }
}
