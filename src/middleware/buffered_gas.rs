//! Gas estimate filling for `eth_sendTransaction`
//!
//! Transactions sent without a `gas` field get one: the node's estimate plus
//! a fixed buffer, capped at the latest block's gas limit.

use super::Middleware;
use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{parse_quantity, to_quantity, BlockHeader, BlockTag, Params, RpcResponse};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Gas added on top of the node's estimate.
pub const GAS_BUFFER: u64 = 100_000;

/// Fills in a buffered `gas` value for transactions that lack one.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedGasEstimateMiddleware;

/// The transaction object of an `eth_sendTransaction` call missing `gas`.
fn transaction_missing_gas<'a>(method: &str, params: &'a Params) -> Option<&'a Value> {
    if method != "eth_sendTransaction" {
        return None;
    }
    params
        .first()
        .filter(|tx| tx.as_object().is_some_and(|obj| !obj.contains_key("gas")))
}

fn latest_params() -> Params {
    vec![Value::from(BlockTag::Latest.as_str()), Value::Bool(false)]
}

fn buffered_estimate(estimate: Result<RpcResponse>, latest: Result<RpcResponse>) -> Result<u64> {
    let estimate = estimate?.into_result()?;
    let estimate = parse_quantity(&estimate)
        .ok_or_else(|| RpcError::InvalidResponse(format!("invalid gas estimate: {estimate}")))?;

    let block = BlockHeader::from_result(latest?.into_result()?)?;
    let limit = block
        .gas_limit
        .ok_or_else(|| RpcError::InvalidResponse("latest block has no gasLimit".to_string()))?;

    if estimate > limit {
        return Err(RpcError::GasLimitExceeded { estimate, limit });
    }
    let gas = estimate.saturating_add(GAS_BUFFER).min(limit);
    debug!("Buffered gas estimate {} -> {}", estimate, gas);
    Ok(gas)
}

fn with_gas(mut params: Params, gas: u64) -> Params {
    if let Some(Value::Object(tx)) = params.first_mut() {
        tx.insert("gas".to_string(), to_quantity(gas));
    }
    params
}

#[async_trait]
impl Middleware for BufferedGasEstimateMiddleware {
    fn process_request(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Params,
    ) -> Result<Params> {
        let Some(tx) = transaction_missing_gas(method, &params) else {
            return Ok(params);
        };
        let estimate = transport.make_request("eth_estimateGas", vec![tx.clone()]);
        let latest = transport.make_request("eth_getBlockByNumber", latest_params());
        let gas = buffered_estimate(estimate, latest)?;
        Ok(with_gas(params, gas))
    }

    async fn async_process_request(
        &self,
        transport: &dyn AsyncTransport,
        method: &str,
        params: Params,
    ) -> Result<Params> {
        let Some(tx) = transaction_missing_gas(method, &params).cloned() else {
            return Ok(params);
        };
        let estimate = transport.make_request("eth_estimateGas", vec![tx]).await;
        let latest = transport
            .make_request("eth_getBlockByNumber", latest_params())
            .await;
        let gas = buffered_estimate(estimate, latest)?;
        Ok(with_gas(params, gas))
    }
}
