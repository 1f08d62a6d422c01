//! Rate limiting middleware
//!
//! Applied once, globally; the route class is derived from method + path so
//! split-method paths (GET vs POST /mapping) land in different budgets.
//! Every response on a limited route carries the `X-RateLimit-*` headers;
//! rejections add `Retry-After`.

use crate::ratelimit::{caller_key, RouteClass};
use crate::state::AppState;
use crate::Error;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Route class by method and path.
pub fn classify(method: &Method, path: &str) -> RouteClass {
    let path = path.trim_end_matches('/');

    if path == "/health" || path.starts_with("/health/") || path == "/metrics" {
        return RouteClass::Health;
    }
    if path.starts_with("/mapping/batch") {
        return if method == Method::POST {
            RouteClass::Batch
        } else {
            RouteClass::Standard
        };
    }
    if (path == "/mapping" && method == Method::POST) || path == "/fhir/ConceptMap/$translate" {
        return RouteClass::Mapping;
    }
    if path.starts_with("/autocomplete")
        || path.starts_with("/fhir")
        || (path.starts_with("/mapping") && method == Method::GET)
    {
        return RouteClass::Search;
    }
    RouteClass::Standard
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let class = classify(req.method(), req.uri().path());
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let caller = caller_key(forwarded);

    let decision = state.rate_limiter.check(class, &caller);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        crate::metrics::RATE_LIMITED_TOTAL
            .with_label_values(&[class.as_str()])
            .inc();
        Error::RateLimited {
            message: decision.message.to_string(),
            retry_after: decision.reset_secs,
        }
        .into_response()
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }

    response
}
