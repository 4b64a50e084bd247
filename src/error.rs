//! Error types for the request layer
//!
//! Every failure the pipeline can surface to a caller is an [`RpcError`].
//! Transport failures, RPC error payloads and middleware-raised errors stay
//! distinguishable so callers can decide what to retry.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Error type for the request layer.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Network or IO failure while talking to the node.
    #[error("transport error during {method}: {message}")]
    Transport {
        /// Method being executed when the failure happened.
        method: String,
        /// Underlying failure description.
        message: String,
    },

    /// Well-formed response carrying an error payload.
    #[error("RPC error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Rpc {
        /// JSON-RPC error code, when the node sent one.
        code: Option<i64>,
        /// Error message from the node.
        message: String,
        /// Optional error data.
        data: Option<Value>,
    },

    /// The latest block is older than the allowed delay.
    #[error(
        "latest block {block_number} (timestamp {timestamp}) is older than the allowed delay of {allowable_delay:?}"
    )]
    StaleBlockchain {
        /// Number of the latest block seen.
        block_number: u64,
        /// Timestamp of the latest block seen.
        timestamp: u64,
        /// Maximum accepted age.
        allowable_delay: Duration,
    },

    /// Estimated gas does not fit in the current block gas limit.
    #[error("estimated gas {estimate} exceeds the current block gas limit {limit}")]
    GasLimitExceeded {
        /// Estimated gas for the transaction.
        estimate: u64,
        /// Gas limit of the latest block.
        limit: u64,
    },

    /// Transaction mixes legacy `gasPrice` with EIP-1559 fee fields.
    #[error("found both gasPrice and maxFeePerGas/maxPriorityFeePerGas in transaction")]
    TransactionTypeMismatch,

    /// Transaction fee fields are inconsistent.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Response that could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A batch builder is already open on this manager.
    #[error("a batch is already in progress on this client")]
    BatchInProgress,

    /// Middleware name already present in the onion.
    #[error("middleware '{0}' is already registered")]
    DuplicateMiddleware(String),

    /// Middleware name not present in the onion.
    #[error("middleware '{0}' is not registered")]
    UnknownMiddleware(String),
}

impl RpcError {
    /// Build a transport error for `method`.
    pub fn transport(method: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from the network layer.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
