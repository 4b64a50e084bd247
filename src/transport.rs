//! Transport boundary and retry wrapper
//!
//! The request layer talks to the node only through [`Transport`] (blocking)
//! and [`AsyncTransport`]. Cache logic never lives below this boundary.

use crate::error::{Result, RpcError};
use crate::types::{Params, RpcResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Blocking transport.
pub trait Transport: Send + Sync {
    /// Execute a single call.
    fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse>;

    /// Execute a batch as one round trip.
    ///
    /// Responses come back in request order; failures are per element.
    fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>>;
}

/// Non-blocking transport.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    /// Execute a single call.
    async fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse>;

    /// Execute a batch as one round trip.
    async fn make_batch_request(&self, requests: Vec<(String, Params)>)
        -> Result<Vec<RpcResponse>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        (**self).make_request(method, params)
    }

    fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>> {
        (**self).make_batch_request(requests)
    }
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for Arc<T> {
    async fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        (**self).make_request(method, params).await
    }

    async fn make_batch_request(
        &self,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        (**self).make_batch_request(requests).await
    }
}

/// Namespaces and methods that are safe to retry after a transport failure.
pub const REQUEST_RETRY_ALLOWLIST: &[&str] = &[
    "admin",
    "miner",
    "net",
    "txpool",
    "testing",
    "evm",
    "eth_protocolVersion",
    "eth_syncing",
    "eth_coinbase",
    "eth_mining",
    "eth_hashrate",
    "eth_chainId",
    "eth_gasPrice",
    "eth_accounts",
    "eth_blockNumber",
    "eth_getBalance",
    "eth_getStorageAt",
    "eth_getProof",
    "eth_getCode",
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_getBlockReceipts",
    "eth_getBlockTransactionCountByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getUncleCountByBlockNumber",
    "eth_getUncleCountByBlockHash",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionReceipt",
    "eth_getTransactionCount",
    "eth_getRawTransactionByHash",
    "eth_call",
    "eth_estimateGas",
    "eth_createAccessList",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_newBlockFilter",
    "eth_newPendingTransactionFilter",
    "eth_newFilter",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_getLogs",
    "eth_uninstallFilter",
    "eth_sign",
    "eth_signTypedData",
];

/// Retry settings for transport failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    retries: u32,
    backoff: Duration,
    method_allowlist: Vec<String>,
}

impl RetryConfig {
    /// Create a retry configuration.
    ///
    /// `retries` is the total number of attempts and `backoff` the fixed delay
    /// between them; both must be positive.
    pub fn new(retries: u32, backoff: Duration, method_allowlist: Vec<String>) -> Result<Self> {
        if retries == 0 {
            return Err(RpcError::InvalidConfig(
                "retries must be a positive number of attempts".to_string(),
            ));
        }
        if backoff.is_zero() {
            return Err(RpcError::InvalidConfig(
                "retry backoff must be a positive duration".to_string(),
            ));
        }
        Ok(Self {
            retries,
            backoff,
            method_allowlist,
        })
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn method_allowlist(&self) -> &[String] {
        &self.method_allowlist
    }

    /// Whether a failed call to `method` may be retried.
    ///
    /// Matches either the exact method name or its namespace (the part
    /// before the first underscore).
    pub fn should_retry(&self, method: &str) -> bool {
        let root = method.split('_').next().unwrap_or(method);
        self.method_allowlist
            .iter()
            .any(|allowed| allowed == root || allowed == method)
    }

    fn should_retry_batch(&self, requests: &[(String, Params)]) -> bool {
        !requests.is_empty() && requests.iter().all(|(method, _)| self.should_retry(method))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: Duration::from_millis(125),
            method_allowlist: REQUEST_RETRY_ALLOWLIST.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Transport wrapper retrying transport failures of allow-listed methods.
///
/// Only [`RpcError::Transport`] errors are retried; RPC error responses are
/// returned as-is. A batch is retried only when every method in it may be.
#[derive(Debug, Clone)]
pub struct RetryingTransport<T> {
    inner: T,
    config: RetryConfig,
}

impl<T> RetryingTransport<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn attempts_for(&self, allowed: bool) -> u32 {
        if allowed {
            self.config.retries
        } else {
            1
        }
    }
}

impl<T: Transport> Transport for RetryingTransport<T> {
    fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        let attempts = self.attempts_for(self.config.should_retry(method));
        let mut attempt = 1;
        loop {
            match self.inner.make_request(method, params.clone()) {
                Err(err) if err.is_transport() && attempt < attempts => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, attempts, method, err);
                    std::thread::sleep(self.config.backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>> {
        let attempts = self.attempts_for(self.config.should_retry_batch(&requests));
        let mut attempt = 1;
        loop {
            match self.inner.make_batch_request(requests.clone()) {
                Err(err) if err.is_transport() && attempt < attempts => {
                    warn!("Batch attempt {}/{} failed: {}", attempt, attempts, err);
                    std::thread::sleep(self.config.backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<T: AsyncTransport> AsyncTransport for RetryingTransport<T> {
    async fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        let attempts = self.attempts_for(self.config.should_retry(method));
        let mut attempt = 1;
        loop {
            match self.inner.make_request(method, params.clone()).await {
                Err(err) if err.is_transport() && attempt < attempts => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, attempts, method, err);
                    tokio::time::sleep(self.config.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn make_batch_request(
        &self,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        let attempts = self.attempts_for(self.config.should_retry_batch(&requests));
        let mut attempt = 1;
        loop {
            match self.inner.make_batch_request(requests.clone()).await {
                Err(err) if err.is_transport() && attempt < attempts => {
                    warn!("Batch attempt {}/{} failed: {}", attempt, attempts, err);
                    tokio::time::sleep(self.config.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
