//! Audit capture middleware
//!
//! Captures request metadata after the response is produced and hands it to
//! the asynchronous audit recorder. Health and metrics probes are skipped.
//! The response is never blocked on recording.

use crate::db::audit::AuditRecord;
use crate::request_context::RequestContext;
use crate::services::audit::{derive_action, is_audited_path};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

pub async fn audit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !is_audited_path(&path) {
        return next.run(req).await;
    }

    let method = req.method().as_str().to_string();
    let query = req.uri().query().map(String::from);
    // Request identity hook: the deployment's gateway supplies the actor.
    let actor = header_string(&req, "x-actor");
    let ip = header_string(&req, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()));
    let user_agent = header_string(&req, "user-agent");
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone());

    let start = Instant::now();
    let response = next.run(req).await;

    let (action, resource_type) = derive_action(&method, &path);
    let mut metadata = serde_json::Map::new();
    if let Some(request_id) = request_id {
        metadata.insert("request_id".to_string(), request_id.into());
    }
    if let Some(query) = query {
        metadata.insert("query".to_string(), query.into());
    }

    state.audit.enqueue(AuditRecord {
        action,
        resource_type,
        resource_id: None,
        actor,
        ip,
        user_agent,
        method: Some(method),
        path: Some(path),
        request_body: None,
        response_status: Some(response.status().as_u16() as i32),
        duration_ms: Some(start.elapsed().as_millis() as i64),
        metadata: Some(serde_json::Value::Object(metadata)),
    });

    response
}

fn header_string(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
