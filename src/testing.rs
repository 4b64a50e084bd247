//! Scripted transport for tests
//!
//! [`MockTransport`] answers calls from per-method scripts and records every
//! call it sees, so tests can assert how often the node was actually hit.

use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{Params, RpcResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&str, &[Value]) -> RpcResponse + Send + Sync>;

#[derive(Default)]
struct Script {
    handlers: HashMap<String, Handler>,
    /// Remaining forced transport failures per method
    transport_failures: HashMap<String, u32>,
    /// Remaining forced transport failures for batch calls
    batch_failures: u32,
}

/// In-memory transport driven by per-method scripts.
///
/// Unscripted methods answer with a `-32601` error response.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<Script>,
    calls: Mutex<Vec<(String, Params)>>,
    batches: Mutex<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `method` with `result`.
    pub fn set_result(&self, method: &str, result: Value) {
        self.set_handler(method, move |_, _| RpcResponse::success(result.clone()));
    }

    /// Always answer `method` with an error payload.
    pub fn set_error(&self, method: &str, code: i64, message: &str) {
        let message = message.to_string();
        self.set_handler(method, move |_, _| RpcResponse::failure(Some(code), message.clone()));
    }

    /// Answer `method` by calling `handler` with the method and params.
    pub fn set_handler<F>(&self, method: &str, handler: F)
    where
        F: Fn(&str, &[Value]) -> RpcResponse + Send + Sync + 'static,
    {
        self.script
            .lock()
            .handlers
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Fail the next `times` single calls to `method` with a transport error.
    pub fn fail_transport(&self, method: &str, times: u32) {
        self.script
            .lock()
            .transport_failures
            .insert(method.to_string(), times);
    }

    /// Fail the next `times` batch calls with a transport error.
    pub fn fail_batches(&self, times: u32) {
        self.script.lock().batch_failures = times;
    }

    /// Every single and batched call seen, in order.
    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().clone()
    }

    /// Number of calls seen for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    /// Number of batch round trips seen.
    pub fn batch_count(&self) -> usize {
        *self.batches.lock()
    }

    fn respond(&self, method: &str, params: &[Value]) -> RpcResponse {
        self.calls.lock().push((method.to_string(), params.to_vec()));
        let handler = self.script.lock().handlers.get(method).cloned();
        match handler {
            Some(handler) => handler(method, params),
            None => RpcResponse::failure(Some(-32601), format!("method not found: {method}")),
        }
    }

    fn single(&self, method: &str, params: Params) -> Result<RpcResponse> {
        {
            let mut script = self.script.lock();
            if let Some(remaining) = script.transport_failures.get_mut(method) {
                if *remaining > 0 {
                    *remaining -= 1;
                    drop(script);
                    self.calls.lock().push((method.to_string(), params));
                    return Err(RpcError::transport(method, "connection reset"));
                }
            }
        }
        Ok(self.respond(method, &params))
    }

    fn batch(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>> {
        *self.batches.lock() += 1;
        {
            let mut script = self.script.lock();
            if script.batch_failures > 0 {
                script.batch_failures -= 1;
                return Err(RpcError::transport("batch", "connection reset"));
            }
        }
        Ok(requests
            .iter()
            .enumerate()
            .map(|(i, (method, params))| {
                let mut response = self.respond(method, params);
                response.id = Some(Value::from(i as u64));
                response
            })
            .collect())
    }
}

impl Transport for MockTransport {
    fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        self.single(method, params)
    }

    fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>> {
        self.batch(requests)
    }
}

#[async_trait]
impl AsyncTransport for MockTransport {
    async fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        tokio::task::yield_now().await;
        self.single(method, params)
    }

    async fn make_batch_request(
        &self,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        tokio::task::yield_now().await;
        self.batch(requests)
    }
}
