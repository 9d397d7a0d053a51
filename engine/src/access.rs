//! Access control rules.
//!
//! A rule is `true | false | (ctx) -> bool | WherePredicate`. Evaluated
//! ahead of every CRUD operation: for reads a predicate is ANDed into the
//! query `WHERE`; for writes a predicate is checked against the row being
//! mutated; `false` denies outright.

use std::sync::Arc;

use crate::context::AppContext;
use crate::error::Result;
use crate::query::Where;

/// What an access rule decided, for the operation being evaluated.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allow,
    Deny,
    /// Restrict to rows matching this predicate.
    Restrict(Where),
}

type DynRule = Arc<dyn Fn(&AppContext) -> Result<AccessDecision> + Send + Sync>;

#[derive(Clone)]
pub enum AccessRule {
    Allow,
    Deny,
    Dynamic(DynRule),
}

impl std::fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessRule::Allow => write!(f, "AccessRule::Allow"),
            AccessRule::Deny => write!(f, "AccessRule::Deny"),
            AccessRule::Dynamic(_) => write!(f, "AccessRule::Dynamic(..)"),
        }
    }
}

impl Default for AccessRule {
    fn default() -> Self {
        AccessRule::Allow
    }
}

impl AccessRule {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&AppContext) -> Result<AccessDecision> + Send + Sync + 'static,
    {
        AccessRule::Dynamic(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &AppContext) -> Result<AccessDecision> {
        match self {
            AccessRule::Allow => Ok(AccessDecision::Allow),
            AccessRule::Deny => Ok(AccessDecision::Deny),
            AccessRule::Dynamic(f) => f(ctx),
        }
    }
}

/// The per-operation rule set a collection declares. `transition` falls
/// back to `update` when a collection has a workflow but no explicit
/// transition rule of its own.
#[derive(Debug, Clone)]
pub struct AccessRules {
    pub create: AccessRule,
    pub read: AccessRule,
    pub update: AccessRule,
    pub delete: AccessRule,
    pub transition: Option<AccessRule>,
}

impl Default for AccessRules {
    fn default() -> Self {
        Self {
            create: AccessRule::Allow,
            read: AccessRule::Allow,
            update: AccessRule::Allow,
            delete: AccessRule::Allow,
            transition: None,
        }
    }
}

impl AccessRules {
    pub fn transition_rule(&self) -> &AccessRule {
        self.transition.as_ref().unwrap_or(&self.update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;

    #[test]
    fn transition_falls_back_to_update_rule() {
        let mut rules = AccessRules::default();
        rules.update = AccessRule::Deny;
        assert!(matches!(rules.transition_rule(), AccessRule::Deny));
    }

    #[test]
    fn dynamic_rule_runs_closure() {
        let rule = AccessRule::dynamic(|_ctx| Ok(AccessDecision::Deny));
        let ctx = AppContext::anonymous("en");
        assert!(matches!(rule.evaluate(&ctx).unwrap(), AccessDecision::Deny));
    }
}
