//! HTTP middleware

mod audit;
mod metrics;
mod rate_limit;
mod request_id;
mod security;

pub use audit::audit_middleware;
pub use metrics::metrics_middleware;
pub use rate_limit::rate_limit_middleware;
pub use request_id::request_id_middleware;
pub use security::security_headers_middleware;

use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub fn compression() -> CompressionLayer {
    CompressionLayer::new()
}

/// CORS layer; permissive headers are only emitted for explicitly
/// configured origins.
pub fn cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let mut values = Vec::with_capacity(origins.len());
    for origin in origins {
        if let Ok(value) = axum::http::HeaderValue::from_str(origin) {
            values.push(value);
        }
    }
    if values.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(values))
        .allow_methods(Any)
        .allow_headers(Any)
}
