//! Prometheus metrics
//!
//! Metric families are registered once via `lazy_static` against the default
//! registry and rendered by the `/metrics` handler in text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Total HTTP requests by method, normalized path and status.
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "setu_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("register HTTP_REQUESTS_TOTAL");

    /// HTTP request duration in seconds.
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "setu_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("register HTTP_REQUEST_DURATION_SECONDS");

    /// Requests rejected by the rate limiter, per route class.
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "setu_rate_limited_total",
        "Requests rejected with 429 by route class",
        &["class"]
    )
    .expect("register RATE_LIMITED_TOTAL");

    /// Mapping pipeline terminal outcomes.
    pub static ref PIPELINE_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "setu_pipeline_outcomes_total",
        "Mapping pipeline outcomes (high_confidence, adjudicated, fallback, unmatched)",
        &["outcome"]
    )
    .expect("register PIPELINE_OUTCOMES");

    /// End-to-end pipeline duration.
    pub static ref PIPELINE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "setu_pipeline_duration_seconds",
        "Mapping pipeline duration in seconds",
        &["source"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]
    )
    .expect("register PIPELINE_DURATION_SECONDS");

    /// External model calls by operation and result.
    pub static ref MODEL_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "setu_model_calls_total",
        "External model calls by operation (embed, generate) and status",
        &["operation", "status"]
    )
    .expect("register MODEL_CALLS_TOTAL");

    /// Cache counters exported at scrape time from the cache registry.
    pub static ref CACHE_COUNTS: IntGaugeVec = register_int_gauge_vec!(
        "setu_cache_counts",
        "Cache counters (hits, misses, sets, evictions, size) per cache",
        &["cache", "counter"]
    )
    .expect("register CACHE_COUNTS");

    /// Batch job gauges.
    pub static ref JOBS_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        "setu_jobs",
        "Batch job queue gauges (queued, active, retained)",
        &["state"]
    )
    .expect("register JOBS_GAUGE");

    /// Batch job item results.
    pub static ref JOB_ITEMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "setu_job_items_total",
        "Processed batch job items by result",
        &["result"]
    )
    .expect("register JOB_ITEMS_TOTAL");
}

/// Collapse parameterized path segments so metric label cardinality stays
/// bounded.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            continue;
        }
        if uuid::Uuid::parse_str(segment).is_ok() {
            segments.push(":id".to_string());
        } else {
            segments.push(segment.to_string());
        }
    }

    // Instance reads under /fhir/CodeSystem/<name> keep the name; everything
    // else parameterized is already a UUID.
    format!("/{}", segments.join("/"))
}

/// Render the default registry in Prometheus text exposition format.
pub fn render() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Push current cache counters into the gauge family before a scrape.
pub fn record_cache_stats(stats: &serde_json::Value) {
    let Some(map) = stats.as_object() else {
        return;
    };
    for (cache, cache_stats) in map {
        let Some(cache_stats) = cache_stats.as_object() else {
            continue;
        };
        for counter in ["hits", "misses", "sets", "evictions", "size"] {
            if let Some(value) = cache_stats.get(counter).and_then(|v| v.as_i64()) {
                CACHE_COUNTS
                    .with_label_values(&[cache.as_str(), counter])
                    .set(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_collapses_uuids() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            normalize_path(&format!("/mapping/batch/{id}")),
            "/mapping/batch/:id"
        );
        assert_eq!(normalize_path("/mapping/"), "/mapping");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/fhir/metadata"), "/fhir/metadata");
    }

    #[test]
    fn render_includes_registered_families() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .inc();
        let text = render();
        assert!(text.contains("setu_http_requests_total"));
    }
}
