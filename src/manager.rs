//! Request managers
//!
//! Entry points for issuing JSON-RPC calls. A manager owns one middleware
//! onion, one transport and, when caching is enabled, one shared cache.
//!
//! Request flow:
//! 1. Cacheable call: look it up, returning a hit straight away
//! 2. Otherwise run it through the onion and the transport
//! 3. Decode the response, surfacing error payloads as [`RpcError::Rpc`]
//! 4. Write the result back if the cache policy allows it

use crate::cache::SimpleCache;
use crate::caching::RequestCache;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::onion::MiddlewareOnion;
use crate::policy::ValidationThreshold;
use crate::transport::{AsyncTransport, RetryingTransport, Transport};
use crate::types::{Params, RpcResponse};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Name the stale check is registered under by `from_config`.
pub const STALE_CHECK_MIDDLEWARE: &str = "stalecheck";

fn decode_batch(responses: Vec<RpcResponse>) -> Vec<Result<Value>> {
    responses.into_iter().map(RpcResponse::into_result).collect()
}

/// Blocking request manager.
#[derive(Debug)]
pub struct RequestManager<T> {
    transport: T,
    onion: MiddlewareOnion,
    cache: RequestCache,
    batching: AtomicBool,
}

impl<T: Transport> RequestManager<T> {
    /// Manager with an empty onion and caching disabled.
    pub fn new(transport: T) -> Self {
        Self::with_request_cache(transport, RequestCache::default())
    }

    /// Manager caching into `cache`, validating against `threshold`.
    pub fn with_cache(
        transport: T,
        cache: Arc<SimpleCache>,
        threshold: Option<ValidationThreshold>,
    ) -> Self {
        Self::with_request_cache(transport, RequestCache::enabled(cache, threshold))
    }

    pub fn with_request_cache(transport: T, cache: RequestCache) -> Self {
        Self {
            transport,
            onion: MiddlewareOnion::new(),
            cache,
            batching: AtomicBool::new(false),
        }
    }

    /// Send a request, blocking until the result is available.
    pub fn request_blocking(&self, method: &str, params: Params) -> Result<Value> {
        let target = self.cache.target(method, &params);
        if let Some(target) = target {
            if let Some(hit) = self.cache.lookup(method, target) {
                return Ok(hit);
            }
        }

        let key_params = target.map(|_| params.clone());
        let result = self
            .onion
            .execute(&self.transport, method, params)?
            .into_result()?;

        if let (Some(target), Some(key_params)) = (target, key_params) {
            self.cache
                .store(&self.transport, target, method, &key_params, &result);
        }
        Ok(result)
    }

    /// Send `requests` as one batch.
    ///
    /// Results come back in request order; an error payload fails only its
    /// own element. Batched results are never cached.
    pub fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<Result<Value>>> {
        debug!("Executing batch of {} requests", requests.len());
        let responses = self.onion.execute_batch(&self.transport, requests)?;
        Ok(decode_batch(responses))
    }

    /// Open a batch builder.
    ///
    /// Only one builder may be open per manager at a time.
    pub fn batch(&self) -> Result<RequestBatch<'_, T>> {
        if self
            .batching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RpcError::BatchInProgress);
        }
        Ok(RequestBatch {
            manager: self,
            requests: Vec::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn middleware_onion(&self) -> &MiddlewareOnion {
        &self.onion
    }

    pub fn middleware_onion_mut(&mut self) -> &mut MiddlewareOnion {
        &mut self.onion
    }

    /// The shared cache, if caching is enabled.
    pub fn request_cache(&self) -> Option<Arc<SimpleCache>> {
        self.cache.cache().cloned()
    }

    /// Cache into `cache`, shared with every other holder of the `Arc`.
    pub fn set_request_cache(&mut self, cache: Arc<SimpleCache>) {
        self.cache.set_cache(cache);
    }

    pub fn validation_threshold(&self) -> Option<ValidationThreshold> {
        self.cache.policy().threshold()
    }

    pub fn set_validation_threshold(&mut self, threshold: Option<ValidationThreshold>) {
        self.cache.policy_mut().set_threshold(threshold);
    }

    /// Allow results of `method` to be cached.
    pub fn allow_caching(&self, method: impl Into<String>) {
        self.cache.policy().allow(method);
    }

    /// Stop caching `method`, registry methods included; returns whether it was cacheable.
    pub fn disallow_caching(&self, method: &str) -> bool {
        self.cache.policy().disallow(method)
    }

    /// Replace the set of cacheable methods.
    pub fn set_cacheable_methods<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.policy().set_cacheable(methods);
    }

    /// Every method whose results may be cached.
    pub fn cacheable_methods(&self) -> Vec<String> {
        self.cache.cacheable_methods()
    }
}

impl<T: Transport> RequestManager<RetryingTransport<T>> {
    /// Build a manager from `config`, wrapping `transport` with retries and
    /// installing the stale check when configured.
    pub fn from_config(transport: T, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = RetryingTransport::new(transport, config.retry_config()?);
        let mut manager = Self::with_request_cache(transport, config.request_cache()?);
        if let Some(stale_check) = config.stale_check()? {
            manager.onion.add(STALE_CHECK_MIDDLEWARE, stale_check)?;
        }
        Ok(manager)
    }
}

/// Batch builder for [`RequestManager`].
///
/// Dropping the builder, executed or not, frees the manager for a new batch.
#[derive(Debug)]
pub struct RequestBatch<'a, T: Transport> {
    manager: &'a RequestManager<T>,
    requests: Vec<(String, Params)>,
}

impl<T: Transport> RequestBatch<'_, T> {
    /// Queue a call.
    pub fn add(&mut self, method: impl Into<String>, params: Params) -> &mut Self {
        self.requests.push((method.into(), params));
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Send every queued call in one round trip.
    pub fn execute(mut self) -> Result<Vec<Result<Value>>> {
        let requests = std::mem::take(&mut self.requests);
        self.manager.make_batch_request(requests)
    }
}

impl<T: Transport> Drop for RequestBatch<'_, T> {
    fn drop(&mut self) {
        self.manager.batching.store(false, Ordering::Release);
    }
}

/// Async request manager.
#[derive(Debug)]
pub struct AsyncRequestManager<T> {
    transport: T,
    onion: MiddlewareOnion,
    cache: RequestCache,
    batching: AtomicBool,
}

impl<T: AsyncTransport> AsyncRequestManager<T> {
    /// Manager with an empty onion and caching disabled.
    pub fn new(transport: T) -> Self {
        Self::with_request_cache(transport, RequestCache::default())
    }

    /// Manager caching into `cache`, validating against `threshold`.
    pub fn with_cache(
        transport: T,
        cache: Arc<SimpleCache>,
        threshold: Option<ValidationThreshold>,
    ) -> Self {
        Self::with_request_cache(transport, RequestCache::enabled(cache, threshold))
    }

    pub fn with_request_cache(transport: T, cache: RequestCache) -> Self {
        Self {
            transport,
            onion: MiddlewareOnion::new(),
            cache,
            batching: AtomicBool::new(false),
        }
    }

    /// Send a request.
    ///
    /// The cache is written only after the last await, so a cancelled call
    /// never leaves a partial entry behind.
    pub async fn coro_request(&self, method: &str, params: Params) -> Result<Value> {
        let target = self.cache.target(method, &params);
        if let Some(target) = target {
            if let Some(hit) = self.cache.lookup(method, target) {
                return Ok(hit);
            }
        }

        let key_params = target.map(|_| params.clone());
        let result = self
            .onion
            .async_execute(&self.transport, method, params)
            .await?
            .into_result()?;

        if let (Some(target), Some(key_params)) = (target, key_params) {
            self.cache
                .async_store(&self.transport, target, method, &key_params, &result)
                .await;
        }
        Ok(result)
    }

    /// Send `requests` as one batch. See [`RequestManager::make_batch_request`].
    pub async fn make_batch_request(
        &self,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<Result<Value>>> {
        debug!("Executing batch of {} requests", requests.len());
        let responses = self
            .onion
            .async_execute_batch(&self.transport, requests)
            .await?;
        Ok(decode_batch(responses))
    }

    /// Open a batch builder.
    ///
    /// Only one builder may be open per manager at a time.
    pub fn batch(&self) -> Result<AsyncRequestBatch<'_, T>> {
        if self
            .batching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RpcError::BatchInProgress);
        }
        Ok(AsyncRequestBatch {
            manager: self,
            requests: Vec::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn middleware_onion(&self) -> &MiddlewareOnion {
        &self.onion
    }

    pub fn middleware_onion_mut(&mut self) -> &mut MiddlewareOnion {
        &mut self.onion
    }

    /// The shared cache, if caching is enabled.
    pub fn request_cache(&self) -> Option<Arc<SimpleCache>> {
        self.cache.cache().cloned()
    }

    /// Cache into `cache`, shared with every other holder of the `Arc`.
    pub fn set_request_cache(&mut self, cache: Arc<SimpleCache>) {
        self.cache.set_cache(cache);
    }

    pub fn validation_threshold(&self) -> Option<ValidationThreshold> {
        self.cache.policy().threshold()
    }

    pub fn set_validation_threshold(&mut self, threshold: Option<ValidationThreshold>) {
        self.cache.policy_mut().set_threshold(threshold);
    }

    /// Allow results of `method` to be cached.
    pub fn allow_caching(&self, method: impl Into<String>) {
        self.cache.policy().allow(method);
    }

    /// Stop caching `method`, registry methods included; returns whether it was cacheable.
    pub fn disallow_caching(&self, method: &str) -> bool {
        self.cache.policy().disallow(method)
    }

    /// Replace the set of cacheable methods.
    pub fn set_cacheable_methods<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.policy().set_cacheable(methods);
    }

    /// Every method whose results may be cached.
    pub fn cacheable_methods(&self) -> Vec<String> {
        self.cache.cacheable_methods()
    }
}

impl<T: AsyncTransport> AsyncRequestManager<RetryingTransport<T>> {
    /// Build a manager from `config`. See [`RequestManager::from_config`].
    pub fn from_config(transport: T, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = RetryingTransport::new(transport, config.retry_config()?);
        let mut manager = Self::with_request_cache(transport, config.request_cache()?);
        if let Some(stale_check) = config.stale_check()? {
            manager.onion.add(STALE_CHECK_MIDDLEWARE, stale_check)?;
        }
        Ok(manager)
    }
}

/// Batch builder for [`AsyncRequestManager`].
#[derive(Debug)]
pub struct AsyncRequestBatch<'a, T: AsyncTransport> {
    manager: &'a AsyncRequestManager<T>,
    requests: Vec<(String, Params)>,
}

impl<T: AsyncTransport> AsyncRequestBatch<'_, T> {
    /// Queue a call.
    pub fn add(&mut self, method: impl Into<String>, params: Params) -> &mut Self {
        self.requests.push((method.into(), params));
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Send every queued call in one round trip.
    pub async fn execute(mut self) -> Result<Vec<Result<Value>>> {
        let requests = std::mem::take(&mut self.requests);
        self.manager.make_batch_request(requests).await
    }
}

impl<T: AsyncTransport> Drop for AsyncRequestBatch<'_, T> {
    fn drop(&mut self) {
        self.manager.batching.store(false, Ordering::Release);
    }
}
