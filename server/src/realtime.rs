//! Multiplexed SSE dispatcher. One HTTP connection carries many
//! client-chosen topics; each topic is backed by a `RefreshGate` so a
//! burst of log rows collapses into a single requery. Subscriptions are
//! kept in a `DashMap` registry of per-connection senders, fanned out by
//! polling `realtime_log` rather than a peer-push broadcast.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use headway_core::{
    AppContext, CrudEngine, FindOptions, RealtimeLogEntry, RefreshGate, ResourceType, SseEvent, Topic,
};
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

struct TopicSubscription {
    topic: Topic,
    sender: mpsc::UnboundedSender<SseEvent>,
    gate: Arc<RefreshGate>,
}

/// Tracks every live SSE connection's subscribed topics, keyed by
/// `(resourceType, resource)` so a single log row only wakes the
/// connections that actually asked about that collection/global.
pub struct RealtimeDispatcher {
    pool: PgPool,
    crud: Arc<CrudEngine>,
    subscriptions: DashMap<(ResourceType, String), DashMap<String, TopicSubscription>>,
    last_seq: std::sync::atomic::AtomicI64,
}

impl RealtimeDispatcher {
    pub fn new(pool: PgPool, crud: Arc<CrudEngine>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            crud,
            subscriptions: DashMap::new(),
            last_seq: std::sync::atomic::AtomicI64::new(0),
        })
    }

    /// Register a fresh subscriber connection; returns a channel the SSE
    /// handler streams from. `topics` is the client-supplied multiplex set
    /// from the initial request body.
    pub fn subscribe(&self, topics: Vec<Topic>) -> (String, mpsc::UnboundedReceiver<SseEvent>) {
        let conn_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in topics {
            let key = topic.key();
            let entry = self.subscriptions.entry(key).or_default();
            entry.insert(
                format!("{conn_id}:{}", topic.id),
                TopicSubscription {
                    topic,
                    sender: tx.clone(),
                    gate: Arc::new(RefreshGate::default()),
                },
            );
        }
        (conn_id, rx)
    }

    pub fn unsubscribe(&self, conn_id: &str) {
        self.subscriptions.retain(|_, topics| {
            topics.retain(|sub_id, _| !sub_id.starts_with(conn_id));
            !topics.is_empty()
        });
    }

    /// Poll `realtime_log` for rows past the last seen sequence and notify
    /// every subscription whose resource matches. Intended to run on a
    /// fixed interval from `main.rs`.
    pub async fn poll_once(self: &Arc<Self>) {
        let since = self.last_seq.load(std::sync::atomic::Ordering::SeqCst);
        let rows = sqlx::query_as::<_, RealtimeLogRow>(
            r#"SELECT "seq", "resourceType", "resource", "operation", "recordId", "locale", "payload"
               FROM "realtime_log" WHERE "seq" > $1 ORDER BY "seq" ASC LIMIT 500"#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "failed to poll realtime log");
                return;
            }
        };

        for row in rows {
            self.last_seq.store(row.seq, std::sync::atomic::Ordering::SeqCst);
            let entry: RealtimeLogEntry = row.into();
            self.dispatch(entry).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, entry: RealtimeLogEntry) {
        let key = (entry.resource_type, entry.resource.clone());
        let Some(topics) = self.subscriptions.get(&key) else {
            return;
        };
        for sub in topics.iter() {
            self.refresh_topic(sub.value()).await;
        }
    }

    async fn refresh_topic(self: &Arc<Self>, sub: &TopicSubscription) {
        use headway_core::RefreshDecision;
        match sub.gate.begin() {
            RefreshDecision::Coalesced => return,
            RefreshDecision::Run => {}
        }

        loop {
            let result = self.run_topic_query(&sub.topic).await;
            match result {
                Ok(data) => {
                    let _ = sub.sender.send(SseEvent::Snapshot {
                        topic_id: sub.topic.id.clone(),
                        seq: self.last_seq.load(std::sync::atomic::Ordering::SeqCst),
                        data,
                    });
                }
                Err(err) => {
                    let _ = sub.sender.send(SseEvent::Error {
                        topic_id: sub.topic.id.clone(),
                        message: err.to_string(),
                    });
                }
            }
            if !sub.gate.finish() {
                break;
            }
        }
    }

    async fn run_topic_query(&self, topic: &Topic) -> headway_core::Result<serde_json::Value> {
        let ctx = AppContext::anonymous("en");
        let opts = FindOptions {
            where_: topic.where_.clone(),
            order_by: topic.order_by.clone(),
            pagination: topic.pagination.clone(),
            stage: None,
            include_deleted: false,
        };
        match topic.resource_type {
            ResourceType::Collection => {
                let result = self.crud.find(&topic.resource, opts, &ctx).await?;
                Ok(serde_json::to_value(result)?)
            }
            ResourceType::Global => {
                let record = self.crud.find_one(&topic.resource, opts, &ctx).await?;
                Ok(serde_json::to_value(record)?)
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct RealtimeLogRow {
    seq: i64,
    #[sqlx(rename = "resourceType")]
    resource_type: String,
    resource: String,
    operation: String,
    #[sqlx(rename = "recordId")]
    record_id: Option<String>,
    locale: Option<String>,
    payload: serde_json::Value,
}

impl From<RealtimeLogRow> for RealtimeLogEntry {
    fn from(row: RealtimeLogRow) -> Self {
        RealtimeLogEntry {
            seq: row.seq,
            resource_type: if row.resource_type == "global" {
                ResourceType::Global
            } else {
                ResourceType::Collection
            },
            resource: row.resource,
            operation: row.operation,
            record_id: row.record_id,
            locale: row.locale,
            payload: row.payload,
        }
    }
}

pub async fn run_poll_loop(dispatcher: Arc<RealtimeDispatcher>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        dispatcher.poll_once().await;
    }
}
