//! Ambient request/transaction context.
//!
//! There is no `AsyncLocalStorage` equivalent threaded implicitly through
//! the call chain; instead `AppContext` is an explicit parameter carrying
//! the active transaction id (if any is open) and the outermost
//! transaction's `afterCommit` queue. Nested `with_transaction` calls clone
//! the same `TransactionState`, so `on_after_commit` always enqueues onto
//! the outermost chain.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;
use crate::hooks::HookFuture;

/// Opaque reference to a database transaction. `Db` adapters map this to
/// their own connection/transaction handle internally; `headway-core`
/// never looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub Uuid);

pub type AfterCommitCallback = Arc<dyn Fn() -> HookFuture<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransactionState {
    pub id: Option<TxId>,
    after_commit: Arc<Mutex<Vec<AfterCommitCallback>>>,
}

impl TransactionState {
    pub fn new(id: TxId) -> Self {
        Self {
            id: Some(id),
            after_commit: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    /// Enqueue a callback to run once the outermost transaction commits.
    /// Called outside any transaction, the callback is expected to be run
    /// immediately and fire-and-forget by the caller (see `crud.rs`).
    pub fn on_after_commit(&self, cb: AfterCommitCallback) {
        self.after_commit.lock().expect("after_commit mutex poisoned").push(cb);
    }

    /// Drain and run every queued callback sequentially. Failures are
    /// logged, never propagated.
    pub async fn run_after_commit(&self) {
        let callbacks = {
            let mut guard = self.after_commit.lock().expect("after_commit mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for cb in callbacks {
            if let Err(err) = cb().await {
                tracing::warn!(error = %err, "onAfterCommit callback failed");
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub user_id: Option<String>,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

/// Everything a CRUD call needs besides the operation's own arguments:
/// locale resolution, the calling session (for access rules), and the
/// ambient transaction.
#[derive(Clone)]
pub struct AppContext {
    pub locale: String,
    pub default_locale: String,
    pub locale_fallback: bool,
    pub session: Option<SessionInfo>,
    pub transaction: TransactionState,
}

impl AppContext {
    pub fn anonymous(locale: impl Into<String>) -> Self {
        let locale = locale.into();
        Self {
            default_locale: locale.clone(),
            locale,
            locale_fallback: false,
            session: None,
            transaction: TransactionState::default(),
        }
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_locale_fallback(mut self, fallback: bool) -> Self {
        self.locale_fallback = fallback;
        self
    }

    /// Reuse the ambient transaction if one is open, otherwise bind a
    /// freshly opened one. Returns a context scoped to that transaction.
    pub fn with_transaction(&self, id: TxId) -> Self {
        if self.transaction.is_active() {
            self.clone()
        } else {
            let mut ctx = self.clone();
            ctx.transaction = TransactionState::new(id);
            ctx
        }
    }

    /// Enqueue a callback for after the outermost transaction commits. When
    /// no transaction is open the queue still holds it; `crud.rs` drains
    /// the queue immediately after the (non-transactional) operation
    /// completes, giving fire-and-forget semantics without requiring
    /// `headway-core` to own an executor of its own.
    pub fn on_after_commit<F>(&self, cb: F)
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.transaction.on_after_commit(Arc::new(cb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_with_transaction_reuses_existing_id() {
        let ctx = AppContext::anonymous("en");
        let id = TxId(Uuid::nil());
        let scoped = ctx.with_transaction(id);
        let nested = scoped.with_transaction(TxId(Uuid::new_v4()));
        assert_eq!(nested.transaction.id, Some(id));
    }
}
