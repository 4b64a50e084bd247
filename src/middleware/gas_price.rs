//! Fee field handling for `eth_sendTransaction`
//!
//! Legacy transactions without any fee field get a `gasPrice` from the
//! configured strategy. EIP-1559 transactions are checked for consistent fee
//! fields, and a missing `maxFeePerGas` is derived from the latest base fee.

use super::Middleware;
use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{parse_quantity, to_quantity, BlockHeader, BlockTag, Params, RpcResponse};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Computes a legacy gas price, in wei, for a transaction.
pub type GasPriceStrategy = Arc<dyn Fn(&Map<String, Value>) -> Option<u64> + Send + Sync>;

const DYNAMIC_FEE_FIELDS: [&str; 2] = ["maxFeePerGas", "maxPriorityFeePerGas"];

/// Applies a gas price strategy and validates transaction fee fields.
#[derive(Clone, Default)]
pub struct GasPriceStrategyMiddleware {
    strategy: Option<GasPriceStrategy>,
}

impl GasPriceStrategyMiddleware {
    /// Validation only, no strategy.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy<F>(strategy: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<u64> + Send + Sync + 'static,
    {
        Self {
            strategy: Some(Arc::new(strategy)),
        }
    }

    /// Fill and check the transaction in place.
    ///
    /// Returns the priority fee when `maxFeePerGas` still has to be derived
    /// from the latest block.
    fn prepare(&self, params: &mut Params) -> Result<Option<u64>> {
        let Some(Value::Object(tx)) = params.first_mut() else {
            return Ok(None);
        };
        let strategy_price = self.strategy.as_ref().and_then(|strategy| strategy(&*tx));
        check_fees(tx, strategy_price)
    }
}

impl fmt::Debug for GasPriceStrategyMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GasPriceStrategyMiddleware")
            .field("strategy", &self.strategy.is_some())
            .finish()
    }
}

fn has_dynamic_fee(tx: &Map<String, Value>) -> bool {
    DYNAMIC_FEE_FIELDS.iter().any(|field| tx.contains_key(*field))
}

fn fee(value: &Value, field: &str) -> Result<u64> {
    parse_quantity(value)
        .ok_or_else(|| RpcError::InvalidTransaction(format!("invalid {field}: {value}")))
}

fn check_fees(tx: &mut Map<String, Value>, strategy_price: Option<u64>) -> Result<Option<u64>> {
    if let Some(price) = strategy_price {
        if !tx.contains_key("gasPrice") && !has_dynamic_fee(tx) {
            debug!("Gas price strategy set gasPrice to {}", price);
            tx.insert("gasPrice".to_string(), to_quantity(price));
        }
    }

    if tx.contains_key("gasPrice") && has_dynamic_fee(tx) {
        return Err(RpcError::TransactionTypeMismatch);
    }
    match (tx.get("maxFeePerGas"), tx.get("maxPriorityFeePerGas")) {
        (Some(max_fee), Some(priority_fee)) => {
            if fee(max_fee, "maxFeePerGas")? < fee(priority_fee, "maxPriorityFeePerGas")? {
                return Err(RpcError::InvalidTransaction(
                    "maxFeePerGas must be >= maxPriorityFeePerGas".to_string(),
                ));
            }
            Ok(None)
        }
        (None, Some(priority_fee)) => fee(priority_fee, "maxPriorityFeePerGas").map(Some),
        (Some(_), None) => Err(RpcError::InvalidTransaction(
            "maxPriorityFeePerGas must be defined in a 1559 transaction".to_string(),
        )),
        (None, None) => Ok(None),
    }
}

fn latest_params() -> Params {
    vec![Value::from(BlockTag::Latest.as_str()), Value::Bool(false)]
}

/// Set `maxFeePerGas` to the priority fee plus twice the latest base fee.
fn with_max_fee(mut params: Params, priority_fee: u64, latest: Result<RpcResponse>) -> Result<Params> {
    let block = BlockHeader::from_result(latest?.into_result()?)?;
    let base_fee = block
        .base_fee_per_gas
        .ok_or_else(|| RpcError::InvalidResponse("latest block has no baseFeePerGas".to_string()))?;

    let max_fee = priority_fee.saturating_add(base_fee.saturating_mul(2));
    debug!("Derived maxFeePerGas {} from base fee {}", max_fee, base_fee);
    if let Some(Value::Object(tx)) = params.first_mut() {
        tx.insert("maxFeePerGas".to_string(), to_quantity(max_fee));
    }
    Ok(params)
}

#[async_trait]
impl Middleware for GasPriceStrategyMiddleware {
    fn process_request(
        &self,
        transport: &dyn Transport,
        method: &str,
        mut params: Params,
    ) -> Result<Params> {
        if method != "eth_sendTransaction" {
            return Ok(params);
        }
        match self.prepare(&mut params)? {
            Some(priority_fee) => {
                let latest = transport.make_request("eth_getBlockByNumber", latest_params());
                with_max_fee(params, priority_fee, latest)
            }
            None => Ok(params),
        }
    }

    async fn async_process_request(
        &self,
        transport: &dyn AsyncTransport,
        method: &str,
        mut params: Params,
    ) -> Result<Params> {
        if method != "eth_sendTransaction" {
            return Ok(params);
        }
        match self.prepare(&mut params)? {
            Some(priority_fee) => {
                let latest = transport
                    .make_request("eth_getBlockByNumber", latest_params())
                    .await;
                with_max_fee(params, priority_fee, latest)
            }
            None => Ok(params),
        }
    }
}
