//! Realtime log + multiplexed subscription types.
//!
//! The append-only log row type, the client-defined topic shape, and the
//! SSE event envelope are plain data; the actual dispatcher (subscription
//! registry, broadcast fan-out) is a `tokio`-backed service in the server
//! crate, structured as a registry of per-connection senders behind a
//! concurrent map. `RefreshGate` is the one piece of synchronisation logic
//! that is executor-agnostic enough to live here.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{OrderBy, Pagination, Where};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Collection,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeLogEntry {
    pub seq: i64,
    pub resource_type: ResourceType,
    pub resource: String,
    pub operation: String,
    pub record_id: Option<String>,
    pub locale: Option<String>,
    pub payload: Value,
}

/// A client-defined query bound to one SSE connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource: String,
    #[serde(default)]
    pub where_: Option<Where>,
    #[serde(default)]
    pub with: Option<Vec<String>>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl Topic {
    pub fn key(&self) -> (ResourceType, String) {
        (self.resource_type, self.resource.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SseEvent {
    Snapshot { topic_id: String, seq: i64, data: Value },
    Error { topic_id: String, message: String },
    Ping { ts: i64 },
}

/// Per-topic refresh discipline: a mutex prevents concurrent refreshes; a
/// new event arriving mid-refresh sets `queued`, so the refresher re-runs
/// exactly once more after finishing rather than piling up concurrent
/// reads of the same topic.
#[derive(Default)]
pub struct RefreshGate {
    state: Mutex<RefreshState>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queued: bool,
}

pub enum RefreshDecision {
    /// Caller should run the refresh now.
    Run,
    /// A refresh is already in flight; this caller's request was coalesced.
    Coalesced,
}

impl RefreshGate {
    /// Call before starting a refresh. If a refresh is already in flight,
    /// marks `queued` and returns `Coalesced` instead of starting another.
    pub fn begin(&self) -> RefreshDecision {
        let mut state = self.state.lock().expect("refresh gate mutex poisoned");
        if state.refreshing {
            state.queued = true;
            RefreshDecision::Coalesced
        } else {
            state.refreshing = true;
            RefreshDecision::Run
        }
    }

    /// Call after a refresh completes. Returns `true` if another refresh
    /// was queued while this one ran and should be started immediately.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock().expect("refresh gate mutex poisoned");
        if state.queued {
            state.queued = false;
            true
        } else {
            state.refreshing = false;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_refresh_request_coalesces_into_one_rerun() {
        let gate = RefreshGate::default();
        assert!(matches!(gate.begin(), RefreshDecision::Run));
        assert!(matches!(gate.begin(), RefreshDecision::Coalesced));
        // A refresh was queued while the first ran, so finish() says rerun.
        assert!(gate.finish());
        // Having rerun immediately (still "refreshing"), finishing again
        // with nothing queued releases the gate.
        assert!(!gate.finish());
        assert!(matches!(gate.begin(), RefreshDecision::Run));
    }
}
