//! Per-request context shared via axum extensions

/// Inserted by the request-id middleware and read by handlers and the audit
/// middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}
