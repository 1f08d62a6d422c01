//! Fixed-window rate limiting
//!
//! Buckets are keyed by `(route class, caller key)` where the caller key is
//! the first entry of the forwarded-for header, falling back to "anonymous".
//! Single-process and best-effort; this is back-pressure, not a security
//! boundary.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Route classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Standard,
    Mapping,
    Batch,
    Search,
    Health,
}

impl RouteClass {
    pub const ALL: [RouteClass; 5] = [
        RouteClass::Standard,
        RouteClass::Mapping,
        RouteClass::Batch,
        RouteClass::Search,
        RouteClass::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Standard => "standard",
            RouteClass::Mapping => "mapping",
            RouteClass::Batch => "batch",
            RouteClass::Search => "search",
            RouteClass::Health => "health",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub window: Duration,
    pub max_requests: u32,
    pub message: &'static str,
}

impl Policy {
    fn default_for(class: RouteClass) -> Policy {
        let minute = Duration::from_secs(60);
        match class {
            RouteClass::Standard => Policy {
                window: minute,
                max_requests: 100,
                message: "Too many requests; please slow down",
            },
            RouteClass::Mapping => Policy {
                window: minute,
                max_requests: 20,
                message: "Translation rate limit reached; use the async batch endpoint for bulk work",
            },
            RouteClass::Batch => Policy {
                window: minute,
                max_requests: 5,
                message: "Batch submission rate limit reached",
            },
            RouteClass::Search => Policy {
                window: minute,
                max_requests: 200,
                message: "Search rate limit reached",
            },
            RouteClass::Health => Policy {
                window: minute,
                max_requests: 1000,
                message: "Health probe rate limit reached",
            },
        }
    }
}

/// Outcome of one admission check, carrying everything the middleware needs
/// for the `X-RateLimit-*` headers.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub message: &'static str,
}

struct Bucket {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

pub struct RateLimiter {
    policies: HashMap<RouteClass, Policy>,
    buckets: Mutex<HashMap<(RouteClass, String), Bucket>>,
}

const IDLE_SWEEP_AFTER: Duration = Duration::from_secs(60);

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        let policies = RouteClass::ALL
            .into_iter()
            .map(|class| (class, Policy::default_for(class)))
            .collect();
        Self {
            policies,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Replace one class's policy (admin/test override).
    pub fn set_policy(&mut self, class: RouteClass, policy: Policy) {
        self.policies.insert(class, policy);
    }

    pub fn check(&self, class: RouteClass, caller: &str) -> Decision {
        let policy = self
            .policies
            .get(&class)
            .cloned()
            .unwrap_or_else(|| Policy::default_for(class));

        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets
            .entry((class, caller.to_string()))
            .or_insert_with(|| Bucket {
                window_start: now,
                count: 0,
                last_seen: now,
            });

        if now.duration_since(bucket.window_start) > policy.window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.count += 1;
        bucket.last_seen = now;

        let elapsed = now.duration_since(bucket.window_start);
        let reset_secs = policy.window.saturating_sub(elapsed).as_secs().max(1);

        Decision {
            allowed: bucket.count <= policy.max_requests,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(bucket.count),
            reset_secs,
            message: policy.message,
        }
    }

    /// Drop buckets idle for more than a minute. Called from a background
    /// sweep task.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_seen) <= IDLE_SWEEP_AFTER);
        before - buckets.len()
    }

    pub fn stats(&self) -> JsonValue {
        let buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let mut per_class: HashMap<&'static str, usize> = HashMap::new();
        for (class, _) in buckets.keys() {
            *per_class.entry(class.as_str()).or_default() += 1;
        }
        serde_json::json!({
            "active_buckets": buckets.len(),
            "by_class": per_class,
        })
    }
}

/// Derive the caller key from a forwarded-for header value.
pub fn caller_key(forwarded_for: Option<&str>) -> String {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(class: RouteClass, max: u32) -> RateLimiter {
        let mut limiter = RateLimiter::new();
        limiter.set_policy(
            class,
            Policy {
                window: Duration::from_secs(60),
                max_requests: max,
                message: "limited",
            },
        );
        limiter
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = limiter_with(RouteClass::Mapping, 2);
        let d1 = limiter.check(RouteClass::Mapping, "1.2.3.4");
        let d2 = limiter.check(RouteClass::Mapping, "1.2.3.4");
        let d3 = limiter.check(RouteClass::Mapping, "1.2.3.4");
        assert!(d1.allowed && d2.allowed);
        assert!(!d3.allowed);
        assert_eq!(d1.remaining, 1);
        assert_eq!(d2.remaining, 0);
        assert_eq!(d3.remaining, 0);
        assert!(d3.reset_secs >= 1);
    }

    #[test]
    fn callers_are_isolated() {
        let limiter = limiter_with(RouteClass::Mapping, 1);
        assert!(limiter.check(RouteClass::Mapping, "a").allowed);
        assert!(limiter.check(RouteClass::Mapping, "b").allowed);
        assert!(!limiter.check(RouteClass::Mapping, "a").allowed);
    }

    #[test]
    fn classes_are_isolated() {
        let limiter = limiter_with(RouteClass::Batch, 1);
        assert!(limiter.check(RouteClass::Batch, "a").allowed);
        assert!(!limiter.check(RouteClass::Batch, "a").allowed);
        assert!(limiter.check(RouteClass::Search, "a").allowed);
    }

    #[test]
    fn default_class_budgets() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.check(RouteClass::Standard, "x").limit, 100);
        assert_eq!(limiter.check(RouteClass::Mapping, "x").limit, 20);
        assert_eq!(limiter.check(RouteClass::Batch, "x").limit, 5);
        assert_eq!(limiter.check(RouteClass::Search, "x").limit, 200);
        assert_eq!(limiter.check(RouteClass::Health, "x").limit, 1000);
    }

    #[test]
    fn caller_key_parses_forwarded_for() {
        assert_eq!(caller_key(Some("10.0.0.1, 10.0.0.2")), "10.0.0.1");
        assert_eq!(caller_key(Some("  10.0.0.3  ")), "10.0.0.3");
        assert_eq!(caller_key(None), "anonymous");
        assert_eq!(caller_key(Some("")), "anonymous");
    }

    #[test]
    fn sweep_drops_only_idle_buckets() {
        let limiter = limiter_with(RouteClass::Standard, 5);
        limiter.check(RouteClass::Standard, "fresh");
        // Nothing is idle yet, so nothing is dropped.
        assert_eq!(limiter.sweep(), 0);
    }
}
