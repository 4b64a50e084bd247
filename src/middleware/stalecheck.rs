//! Stale chain guard
//!
//! Refuses to send requests while the node's latest block is older than an
//! allowed delay. The last block found fresh is remembered, so a healthy node
//! costs one extra `eth_getBlockByNumber` per delay window rather than one per
//! request.

use super::Middleware;
use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{BlockHeader, BlockTag, Params, RpcResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Methods passed through without a freshness check.
pub const SKIP_STALECHECK_FOR_METHODS: &[&str] = &["eth_getBlockByNumber"];

/// Middleware raising [`RpcError::StaleBlockchain`] when the chain stops moving.
#[derive(Debug)]
pub struct StaleCheckMiddleware {
    allowable_delay: Duration,
    skip_methods: Vec<String>,
    latest: Mutex<Option<BlockHeader>>,
}

impl StaleCheckMiddleware {
    /// Create the middleware; `allowable_delay` must be positive.
    pub fn new(allowable_delay: Duration) -> Result<Self> {
        if allowable_delay.is_zero() {
            return Err(RpcError::InvalidConfig(
                "stale check needs a positive allowable delay".to_string(),
            ));
        }
        Ok(Self {
            allowable_delay,
            skip_methods: SKIP_STALECHECK_FOR_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            latest: Mutex::new(None),
        })
    }

    /// Replace the list of methods that skip the check.
    pub fn with_skip_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowable_delay(&self) -> Duration {
        self.allowable_delay
    }

    fn needs_check(&self, method: &str) -> bool {
        if self.skip_methods.iter().any(|m| m == method) {
            return false;
        }
        let latest = self.latest.lock();
        !latest
            .as_ref()
            .is_some_and(|block| is_fresh(block, self.allowable_delay))
    }

    /// Judge a freshly fetched latest block, remembering it when fresh.
    fn accept_latest(&self, response: Result<RpcResponse>) -> Result<()> {
        let block = BlockHeader::from_result(response?.into_result()?)?;
        if is_fresh(&block, self.allowable_delay) {
            debug!("Latest block {} is fresh", block.number);
            *self.latest.lock() = Some(block);
            return Ok(());
        }

        warn!(
            "Latest block {} is older than {:?}",
            block.number, self.allowable_delay
        );
        Err(RpcError::StaleBlockchain {
            block_number: block.number,
            timestamp: block.timestamp.unwrap_or_default(),
            allowable_delay: self.allowable_delay,
        })
    }
}

fn latest_params() -> Params {
    vec![Value::from(BlockTag::Latest.as_str()), Value::Bool(false)]
}

fn is_fresh(block: &BlockHeader, allowable_delay: Duration) -> bool {
    let Some(timestamp) = block.timestamp else {
        return false;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    now.saturating_sub(timestamp) <= allowable_delay.as_secs()
}

#[async_trait]
impl Middleware for StaleCheckMiddleware {
    fn process_request(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Params,
    ) -> Result<Params> {
        if self.needs_check(method) {
            self.accept_latest(transport.make_request("eth_getBlockByNumber", latest_params()))?;
        }
        Ok(params)
    }

    async fn async_process_request(
        &self,
        transport: &dyn AsyncTransport,
        method: &str,
        params: Params,
    ) -> Result<Params> {
        if self.needs_check(method) {
            let response = transport
                .make_request("eth_getBlockByNumber", latest_params())
                .await;
            self.accept_latest(response)?;
        }
        Ok(params)
    }
}
