//! Abstract auth interface: resolving a request's session. The concrete
//! provider (JWT, session cookie, API key) is out of scope; the core only
//! needs the resolved identity to populate `AppContext::session`.

use async_trait::async_trait;

use crate::context::SessionInfo;
use crate::error::Result;

#[async_trait]
pub trait Auth: Send + Sync {
    /// Resolve an opaque bearer token (or other credential, adapter-
    /// defined) into a session. `Ok(None)` means anonymous, not an error.
    async fn resolve(&self, credential: &str) -> Result<Option<SessionInfo>>;
}
