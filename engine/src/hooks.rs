//! Hook lifecycle: `before/afterChange`,
//! `before/afterDelete`, `before/afterTransition`, `validate`, plus the
//! module-level hooks a CMS instance registers across collections.
//!
//! Hooks may suspend arbitrarily (DB/mailer/queue calls), so every hook is
//! boxed as an async closure returning a `HookFuture`.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;

pub type HookFuture<T> = BoxFuture<'static, Result<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Transition,
    Read,
}

/// Shared context passed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub collection: String,
    pub operation: OperationKind,
    pub locale: String,
    pub session_user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub from_stage: String,
    pub to_stage: String,
}

pub type BeforeChangeHook = Arc<dyn Fn(Value, HookContext) -> HookFuture<Value> + Send + Sync>;
pub type AfterChangeHook = Arc<dyn Fn(Value, HookContext) -> HookFuture<()> + Send + Sync>;
pub type BeforeDeleteHook = Arc<dyn Fn(HookContext) -> HookFuture<()> + Send + Sync>;
pub type AfterDeleteHook = Arc<dyn Fn(HookContext) -> HookFuture<()> + Send + Sync>;
pub type BeforeTransitionHook =
    Arc<dyn Fn(TransitionContext, HookContext) -> HookFuture<()> + Send + Sync>;
pub type AfterTransitionHook =
    Arc<dyn Fn(TransitionContext, HookContext) -> HookFuture<()> + Send + Sync>;
pub type ValidateHook = Arc<dyn Fn(Value, HookContext) -> HookFuture<()> + Send + Sync>;

/// The hooks a single collection registers, run in registration order
/// before/after any module-level hooks of the same kind.
#[derive(Clone, Default)]
pub struct HookSet {
    pub before_change: Vec<BeforeChangeHook>,
    pub after_change: Vec<AfterChangeHook>,
    pub before_delete: Vec<BeforeDeleteHook>,
    pub after_delete: Vec<AfterDeleteHook>,
    pub before_transition: Vec<BeforeTransitionHook>,
    pub after_transition: Vec<AfterTransitionHook>,
    pub validate: Vec<ValidateHook>,
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("before_change", &self.before_change.len())
            .field("after_change", &self.after_change.len())
            .field("before_delete", &self.before_delete.len())
            .field("after_delete", &self.after_delete.len())
            .field("before_transition", &self.before_transition.len())
            .field("after_transition", &self.after_transition.len())
            .field("validate", &self.validate.len())
            .finish()
    }
}

/// Which collections a module-level hook applies to.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

impl CollectionFilter {
    pub fn matches(&self, collection: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.iter().any(|c| c == collection) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.iter().any(|c| c == collection) {
                return false;
            }
        }
        true
    }
}

/// Module-level hooks a CMS instance registers once, applied to every
/// matching collection's CRUD operations in registration order.
#[derive(Clone, Default)]
pub struct GlobalHooks {
    pub before_change: Vec<(CollectionFilter, BeforeChangeHook)>,
    pub after_change: Vec<(CollectionFilter, AfterChangeHook)>,
    pub before_delete: Vec<(CollectionFilter, BeforeDeleteHook)>,
    pub after_delete: Vec<(CollectionFilter, AfterDeleteHook)>,
}

impl GlobalHooks {
    pub fn before_change_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a BeforeChangeHook> + 'a {
        self.before_change
            .iter()
            .filter(move |(f, _)| f.matches(collection))
            .map(|(_, h)| h)
    }

    pub fn after_change_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a AfterChangeHook> + 'a {
        self.after_change
            .iter()
            .filter(move |(f, _)| f.matches(collection))
            .map(|(_, h)| h)
    }

    pub fn before_delete_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a BeforeDeleteHook> + 'a {
        self.before_delete
            .iter()
            .filter(move |(f, _)| f.matches(collection))
            .map(|(_, h)| h)
    }

    pub fn after_delete_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a AfterDeleteHook> + 'a {
        self.after_delete
            .iter()
            .filter(move |(f, _)| f.matches(collection))
            .map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_excludes_take_priority_over_include() {
        let filter = CollectionFilter {
            include: Some(vec!["posts".into(), "pages".into()]),
            exclude: Some(vec!["pages".into()]),
        };
        assert!(filter.matches("posts"));
        assert!(!filter.matches("pages"));
        assert!(!filter.matches("users"));
    }

    #[test]
    fn default_filter_matches_everything() {
        let filter = CollectionFilter::default();
        assert!(filter.matches("anything"));
    }
}
