//! Proof-of-authority block field rename
//!
//! PoA chains stuff signer data into `extraData`, which then no longer fits
//! the 32 bytes ordinary blocks allow. This middleware moves it to
//! `proofOfAuthorityData` in block results.

use super::Middleware;
use crate::error::Result;
use crate::transport::{AsyncTransport, Transport};
use crate::types::RpcResponse;
use async_trait::async_trait;
use serde_json::Value;

const BLOCK_METHODS: &[&str] = &["eth_getBlockByHash", "eth_getBlockByNumber", "eth_subscribe"];

/// Renames `extraData` to `proofOfAuthorityData` in block results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraDataToPoaMiddleware;

impl ExtraDataToPoaMiddleware {
    fn remap(method: &str, mut response: RpcResponse) -> RpcResponse {
        if !BLOCK_METHODS.contains(&method) {
            return response;
        }
        // eth_subscribe answers with a subscription id string; only objects change
        if let Some(Value::Object(block)) = response.result.as_mut() {
            if let Some(extra) = block.remove("extraData") {
                block.insert("proofOfAuthorityData".to_string(), extra);
            }
        }
        response
    }
}

#[async_trait]
impl Middleware for ExtraDataToPoaMiddleware {
    fn process_response(
        &self,
        _: &dyn Transport,
        method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        Ok(Self::remap(method, response))
    }

    async fn async_process_response(
        &self,
        _: &dyn AsyncTransport,
        method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        Ok(Self::remap(method, response))
    }
}
