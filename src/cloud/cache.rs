//! Call Cache
//!
//! Memoizes successful control-plane responses keyed by the call descriptor.
//! Entries expire by age; an expired entry is dropped the next time its key is
//! looked up. Failures are never stored.

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Identity of one control-plane call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallDescriptor {
    pub service: String,
    pub operation: String,
    /// Canonical JSON of the parameters, object keys sorted
    pub params: String,
}

impl CallDescriptor {
    pub fn new(service: &str, operation: &str, params: &Value) -> Self {
        Self {
            service: service.to_string(),
            operation: operation.to_string(),
            params: canonical_json(params),
        }
    }
}

/// Serialize `value` with object keys in sorted order at every level
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

impl std::fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.service, self.operation, self.params)
    }
}

#[derive(Clone)]
struct CachedResult {
    value: Value,
    captured_at: Instant,
}

impl CachedResult {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() < ttl
    }
}

/// Process-wide memo table for control-plane calls
#[derive(Default)]
pub struct CallCache {
    entries: Mutex<HashMap<CallDescriptor, CachedResult>>,
}

impl CallCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key` if it was captured less than `ttl` ago,
    /// otherwise run `fetch` and remember its result.
    ///
    /// A zero `ttl` always runs `fetch` and stores nothing.
    pub async fn invoke<F, Fut>(&self, key: &CallDescriptor, ttl: Duration, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if ttl.is_zero() {
            return fetch().await;
        }

        if let Some(value) = self.lookup(key, ttl) {
            tracing::trace!("cache hit: {}", key);
            return Ok(value);
        }

        self.refresh(key, fetch).await
    }

    /// Run `fetch` without consulting the cache and store a successful result.
    pub async fn refresh<F, Fut>(&self, key: &CallDescriptor, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let value = fetch().await?;
        self.entries.lock().insert(
            key.clone(),
            CachedResult {
                value: value.clone(),
                captured_at: Instant::now(),
            },
        );
        Ok(value)
    }

    fn lookup(&self, key: &CallDescriptor, ttl: Duration) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(ttl) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor() -> CallDescriptor {
        CallDescriptor::new("dynamodb", "describe-table", &json!({"table-name": "orders"}))
    }

    #[test]
    fn test_descriptor_is_order_independent() {
        let a = CallDescriptor::new("s3api", "x", &json!({"a": 1, "b": 2}));
        let b = CallDescriptor::new("s3api", "x", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);

        let nested = CallDescriptor::new("s3api", "x", &json!({"z": [{"b": 1, "a": null}]}));
        assert_eq!(nested.params, r#"{"z":[{"a":null,"b":1}]}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_evicted_on_lookup() {
        let cache = CallCache::new();
        let key = descriptor();
        cache
            .invoke(&key, Duration::from_secs(5), || async { Ok(json!(1)) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.lookup(&key, Duration::from_secs(5)).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_is_never_stored() {
        let cache = CallCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .invoke(&descriptor(), Duration::ZERO, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let cache = CallCache::new();
        let key = descriptor();
        let ttl = Duration::from_secs(5);

        let first = cache
            .invoke(&key, ttl, || async { Err(anyhow::anyhow!("throttled")) })
            .await;
        assert!(first.is_err());

        let second = cache.invoke(&key, ttl, || async { Ok(json!("ok")) }).await;
        assert_eq!(second.unwrap(), json!("ok"));
    }
}
