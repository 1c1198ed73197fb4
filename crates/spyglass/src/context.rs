//! Request context
//!
//! The host serving layer exposes, for each unit of work, an optional
//! description of the inbound request plus a mutable marker slot used to
//! tag "this client session should be per-request-profiled as session N."
//!
//! The context is explicit state threaded through the request-handling
//! pipeline — never an ambient global. The host owns persistence of the
//! marker across requests of the same client session (it lives wherever the
//! host keeps its session store); spyglass only reads and writes the slot.

use serde::{Deserialize, Serialize};

use crate::records::SessionId;

/// Description of the inbound request being handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request path, e.g. `/web/dataset/call`.
    pub path: String,
    /// Root URL of the host, e.g. `https://erp.example.com/`.
    pub root_url: String,
    /// Acting user, if authenticated.
    pub user: Option<String>,
    /// Serialized request context (locale, company, flags...).
    pub context: serde_json::Value,
}

impl RequestInfo {
    /// The request context as a compact string, for storage on a sample row.
    pub fn context_string(&self) -> String {
        self.context.to_string()
    }
}

/// Per-unit-of-work execution context.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    info: Option<RequestInfo>,
    client_id: Option<String>,
    marker: Option<SessionId>,
}

impl RequestContext {
    /// Context for work with no inbound request (startup, cron, shell).
    pub fn background() -> Self {
        Self::default()
    }

    /// Context for an inbound request. `client_id` identifies the client
    /// session the request belongs to.
    pub fn for_request(info: RequestInfo, client_id: impl Into<String>) -> Self {
        Self {
            info: Some(info),
            client_id: Some(client_id.into()),
            marker: None,
        }
    }

    pub fn request(&self) -> Option<&RequestInfo> {
        self.info.as_ref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// The live per-request profiling marker, if one is stashed on this
    /// context.
    pub fn profile_marker(&self) -> Option<SessionId> {
        self.marker
    }

    /// Stash or clear the per-request profiling marker.
    pub fn set_profile_marker(&mut self, marker: Option<SessionId>) {
        self.marker = marker;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_has_no_request() {
        let ctx = RequestContext::background();
        assert!(ctx.request().is_none());
        assert!(ctx.client_id().is_none());
        assert!(ctx.profile_marker().is_none());
    }

    #[test]
    fn test_marker_slot_set_and_clear() {
        let info = RequestInfo {
            path: "/web".to_string(),
            root_url: "https://example.com/".to_string(),
            user: Some("admin".to_string()),
            context: serde_json::json!({"lang": "en_US"}),
        };
        let mut ctx = RequestContext::for_request(info, "sid-1");
        assert_eq!(ctx.client_id(), Some("sid-1"));

        let session = SessionId::new();
        ctx.set_profile_marker(Some(session));
        assert_eq!(ctx.profile_marker(), Some(session));

        ctx.set_profile_marker(None);
        assert!(ctx.profile_marker().is_none());
    }

    #[test]
    fn test_context_string_is_compact_json() {
        let info = RequestInfo {
            path: "/".to_string(),
            root_url: "https://example.com/".to_string(),
            user: None,
            context: serde_json::json!({"uid": 2}),
        };
        assert_eq!(info.context_string(), r#"{"uid":2}"#);
    }
}
