//! Request handlers for the CMS HTTP surface.

pub mod collections;
pub mod globals;
pub mod realtime;
pub mod rpc;
pub mod search;
pub mod storage;

/// Shared `AppContext` construction: resolves locale from the `?locale=`
/// query parameter (falling back to the schema's default) and carries the
/// extracted session through.
pub(crate) fn context(
    session: Option<headway_core::SessionInfo>,
    locale: Option<String>,
) -> headway_core::AppContext {
    let mut ctx = headway_core::AppContext::anonymous(locale.unwrap_or_else(|| "en".to_string()));
    if let Some(session) = session {
        ctx = ctx.with_session(session);
    }
    ctx
}
