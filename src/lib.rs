//! rpc-onion - Ethereum JSON-RPC request layer
//!
//! This library routes JSON-RPC calls through a composable middleware onion,
//! memoizes idempotent results in a per-client cache guarded against chain
//! reorganizations, and hands the final call to a pluggable transport.

pub mod cache;
pub mod caching;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod keys;
pub mod manager;
pub mod middleware;
pub mod onion;
pub mod policy;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod types;

// Re-export the main types for convenience
pub use cache::SimpleCache;
pub use config::ClientConfig;
pub use error::{Result, RpcError};
pub use keys::{generate_cache_key, CacheKey, ContextId};
pub use manager::{AsyncRequestBatch, AsyncRequestManager, RequestBatch, RequestManager};
pub use middleware::{FnMiddleware, Middleware};
pub use onion::MiddlewareOnion;
pub use policy::{CachePolicy, ValidationThreshold};
pub use transport::{AsyncTransport, RetryConfig, RetryingTransport, Transport};
pub use types::{Params, RpcResponse};
