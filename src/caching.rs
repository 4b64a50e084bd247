//! Per-client request caching
//!
//! Ties the shared [`SimpleCache`] to the [`CachePolicy`]: decides which calls
//! are looked up, and which results are written back after a miss.

use crate::cache::SimpleCache;
use crate::keys::{generate_cache_key, CacheKey, ContextId};
use crate::policy::{CachePolicy, ValidationThreshold};
use crate::transport::{AsyncTransport, Transport};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A call eligible for caching, keyed for the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTarget {
    pub key: CacheKey,
}

/// Cache state owned by one request manager.
#[derive(Debug, Default)]
pub struct RequestCache {
    cache: Option<Arc<SimpleCache>>,
    policy: CachePolicy,
}

impl RequestCache {
    /// Caching disabled, validation at the given threshold once enabled.
    pub fn disabled(threshold: Option<ValidationThreshold>) -> Self {
        Self {
            cache: None,
            policy: CachePolicy::new(threshold),
        }
    }

    /// Caching enabled with `cache` as storage.
    pub fn enabled(cache: Arc<SimpleCache>, threshold: Option<ValidationThreshold>) -> Self {
        Self {
            cache: Some(cache),
            policy: CachePolicy::new(threshold),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&Arc<SimpleCache>> {
        self.cache.as_ref()
    }

    /// Install `cache` as storage, enabling caching.
    pub fn set_cache(&mut self, cache: Arc<SimpleCache>) {
        self.cache = Some(cache);
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut CachePolicy {
        &mut self.policy
    }

    /// Methods currently cacheable, sorted.
    pub fn cacheable_methods(&self) -> Vec<String> {
        self.policy.cacheable_methods()
    }

    /// Key for `method`/`params` when caching applies to this call.
    pub fn target(&self, method: &str, params: &[Value]) -> Option<CacheTarget> {
        if self.cache.is_none() || !self.policy.is_cacheable_endpoint(method) {
            return None;
        }
        let key = generate_cache_key(&ContextId::current(), method, params);
        Some(CacheTarget { key })
    }

    /// Cached result for `target`.
    pub fn lookup(&self, method: &str, target: CacheTarget) -> Option<Value> {
        let hit = self.cache.as_ref()?.get_cache_entry(&target.key);
        match &hit {
            Some(_) => debug!("Cache hit for {} ({})", method, target.key),
            None => debug!("Cache miss for {} ({})", method, target.key),
        }
        hit
    }

    /// Store `result` if the policy allows, resolving block references with
    /// blocking side calls.
    pub fn store(
        &self,
        transport: &dyn Transport,
        target: CacheTarget,
        method: &str,
        params: &[Value],
        result: &Value,
    ) {
        if self
            .policy
            .is_cacheable(transport, method, params, Some(result))
        {
            self.write(target, method, result);
        }
    }

    /// Async counterpart of [`RequestCache::store`].
    pub async fn async_store(
        &self,
        transport: &dyn AsyncTransport,
        target: CacheTarget,
        method: &str,
        params: &[Value],
        result: &Value,
    ) {
        if self
            .policy
            .async_is_cacheable(transport, method, params, Some(result))
            .await
        {
            self.write(target, method, result);
        }
    }

    fn write(&self, target: CacheTarget, method: &str, result: &Value) {
        let Some(cache) = &self.cache else {
            return;
        };
        debug!("Caching {} ({})", method, target.key);
        if let Some(evicted) = cache.cache(target.key, result.clone()) {
            debug!("Evicted {} cache entries", evicted.len());
        }
    }
}
