//! Cache key derivation
//!
//! A cache key is the keccak-256 digest of the calling context, the method
//! name and the JSON-encoded parameters. Each field is length-prefixed before
//! hashing so distinct triples never share a pre-image.

use alloy_primitives::{keccak256, B256};
use serde_json::Value;
use std::fmt;
use std::future::Future;

tokio::task_local! {
    static CURRENT_CONTEXT: ContextId;
}

/// Identifier of the logical caller a cache entry belongs to.
///
/// Two concurrent callers sharing one cache never collide because their
/// context ids differ. By default the context is the running tokio task, or
/// the current OS thread outside a task. An explicit correlation id can be
/// installed with [`ContextId::scope`] or [`ContextId::sync_scope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    /// Caller-supplied correlation id.
    pub fn new(id: impl fmt::Display) -> Self {
        Self(format!("ctx:{}", id))
    }

    /// Context of the current OS thread.
    pub fn thread() -> Self {
        Self(format!("thread:{:?}", std::thread::current().id()))
    }

    /// Context of the running tokio task, if any.
    ///
    /// Stable for the task's lifetime, even when a multi-threaded runtime
    /// moves it between workers.
    pub fn task() -> Option<Self> {
        tokio::task::try_id().map(|id| Self(format!("task:{}", id)))
    }

    /// Context in effect for the running code.
    ///
    /// Returns the innermost scoped id if one is installed, then the task
    /// context, then the thread context.
    pub fn current() -> Self {
        CURRENT_CONTEXT
            .try_with(ContextId::clone)
            .ok()
            .or_else(Self::task)
            .unwrap_or_else(Self::thread)
    }

    /// Run `fut` with this id as the current context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_CONTEXT.scope(self, fut).await
    }

    /// Run `f` with this id as the current context.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_CONTEXT.sync_scope(self, f)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of a `(context, method, params)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(B256);

impl CacheKey {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// 0x-prefixed hex form of the digest.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Encode the hashing pre-image for a cache key.
///
/// Format: for each of context, method and params JSON, a 4-byte big-endian
/// length followed by the UTF-8 bytes.
fn encode_key_preimage(context: &ContextId, method: &str, params: &[Value]) -> Vec<u8> {
    let params_json = Value::Array(params.to_vec()).to_string();
    let fields = [context.as_str(), method, params_json.as_str()];

    let total: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut preimage = Vec::with_capacity(total);
    for field in fields {
        preimage.extend_from_slice(&(field.len() as u32).to_be_bytes());
        preimage.extend_from_slice(field.as_bytes());
    }
    preimage
}

/// Derive the cache key for a call made in `context`.
pub fn generate_cache_key(context: &ContextId, method: &str, params: &[Value]) -> CacheKey {
    CacheKey(keccak256(encode_key_preimage(context, method, params)))
}
