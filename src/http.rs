//! HTTP transports for Ethereum nodes
//!
//! JSON-RPC 2.0 over HTTP POST, blocking ([`HttpTransport`]) and async
//! ([`AsyncHttpTransport`]). Batch responses may arrive in any order and are
//! put back into request order by id.

use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{Params, RpcResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Build a request envelope.
fn envelope(id: u64, method: &str, params: &Params) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

fn batch_body(first_id: u64, requests: &[(String, Params)]) -> Value {
    Value::Array(
        requests
            .iter()
            .zip(first_id..)
            .map(|((method, params), id)| envelope(id, method, params))
            .collect(),
    )
}

/// Decode a batch reply and order it by request id.
fn order_batch(first_id: u64, expected: usize, body: Value) -> Result<Vec<RpcResponse>> {
    let Value::Array(items) = body else {
        // Nodes answer a rejected batch with a single error object
        let response: RpcResponse = serde_json::from_value(body)?;
        return match response.error {
            Some(error) => Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Err(RpcError::InvalidResponse(
                "batch reply is not an array".to_string(),
            )),
        };
    };

    if items.len() != expected {
        return Err(RpcError::InvalidResponse(format!(
            "batch returned {} responses for {} requests",
            items.len(),
            expected
        )));
    }

    let mut slots: Vec<Option<RpcResponse>> = vec![None; expected];
    for item in items {
        let response: RpcResponse = serde_json::from_value(item)?;
        let index = response
            .id
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|id| id.checked_sub(first_id))
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&index| index < expected)
            .ok_or_else(|| {
                RpcError::InvalidResponse(format!("unexpected batch response id: {:?}", response.id))
            })?;
        slots[index] = Some(response);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| RpcError::InvalidResponse(format!("missing batch response {}", i)))
        })
        .collect()
}

/// Blocking JSON-RPC client for Ethereum nodes.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::blocking::Client::new(), url)
    }

    /// Create a transport reusing an existing client.
    pub fn with_client(client: reqwest::blocking::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, label: &str, body: &Value) -> Result<Value> {
        self.client
            .post(&self.url)
            .json(body)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| RpcError::transport(label, e))?
            .json()
            .map_err(|e| RpcError::transport(label, e))
    }
}

impl Transport for HttpTransport {
    fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("POST {} id={} to {}", method, id, self.url);
        let body = self.post(method, &envelope(id, method, &params))?;
        Ok(serde_json::from_value(body)?)
    }

    fn make_batch_request(&self, requests: Vec<(String, Params)>) -> Result<Vec<RpcResponse>> {
        let first_id = self
            .next_id
            .fetch_add(requests.len() as u64, Ordering::Relaxed);
        debug!("POST batch of {} to {}", requests.len(), self.url);
        let body = self.post("batch", &batch_body(first_id, &requests))?;
        order_batch(first_id, requests.len(), body)
    }
}

/// Async JSON-RPC client for Ethereum nodes.
pub struct AsyncHttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl AsyncHttpTransport {
    /// Create a new HTTP transport.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a transport reusing an existing client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, label: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RpcError::transport(label, e))?;

        response
            .json()
            .await
            .map_err(|e| RpcError::transport(label, e))
    }
}

#[async_trait]
impl AsyncTransport for AsyncHttpTransport {
    async fn make_request(&self, method: &str, params: Params) -> Result<RpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("POST {} id={} to {}", method, id, self.url);
        let body = self.post(method, &envelope(id, method, &params)).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn make_batch_request(
        &self,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        let first_id = self
            .next_id
            .fetch_add(requests.len() as u64, Ordering::Relaxed);
        debug!("POST batch of {} to {}", requests.len(), self.url);
        let body = self.post("batch", &batch_body(first_id, &requests)).await?;
        order_batch(first_id, requests.len(), body)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("url", &self.url).finish()
    }
}

impl std::fmt::Debug for AsyncHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHttpTransport")
            .field("url", &self.url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope() {
        let body = envelope(7, "eth_getBalance", &vec![json!("0xabc"), json!("latest")]);
        assert_eq!(
            body,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "eth_getBalance",
                "params": ["0xabc", "latest"]
            })
        );
    }

    #[test]
    fn test_batch_body_assigns_sequential_ids() {
        let body = batch_body(
            10,
            &[
                ("eth_chainId".to_string(), vec![]),
                ("net_version".to_string(), vec![]),
            ],
        );
        assert_eq!(body[0]["id"], json!(10));
        assert_eq!(body[1]["id"], json!(11));
        assert_eq!(body[1]["method"], json!("net_version"));
    }

    #[test]
    fn test_order_batch_reorders_by_id() {
        let body = json!([
            {"jsonrpc": "2.0", "id": 6, "error": {"code": -32601, "message": "nope"}},
            {"jsonrpc": "2.0", "id": 5, "result": "0x1"}
        ]);
        let responses = order_batch(5, 2, body).unwrap();
        assert_eq!(responses[0].result, Some(json!("0x1")));
        assert!(responses[1].is_error());
    }

    #[test]
    fn test_order_batch_rejects_bad_replies() {
        // Wrong count
        assert!(order_batch(1, 2, json!([{"id": 1, "result": 1}])).is_err());

        // Unknown id
        assert!(order_batch(1, 1, json!([{"id": 9, "result": 1}])).is_err());

        // Duplicate id leaves a hole
        assert!(order_batch(1, 2, json!([{"id": 1, "result": 1}, {"id": 1, "result": 2}])).is_err());

        // Whole batch rejected
        match order_batch(1, 1, json!({"id": null, "error": {"code": -32600, "message": "bad"}})) {
            Err(RpcError::Rpc { code, .. }) => assert_eq!(code, Some(-32600)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_transport_ids_advance() {
        let transport = HttpTransport::new("http://127.0.0.1:8545");
        assert_eq!(transport.url(), "http://127.0.0.1:8545");
        assert_eq!(transport.next_id.load(Ordering::Relaxed), 1);
    }
}
