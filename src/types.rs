//! JSON-RPC envelope and block reference types
//!
//! Decoded responses as seen by middleware and the request manager, plus the
//! small amount of block vocabulary the caching policy needs.

use crate::error::{Result, RpcError};
use alloy_primitives::B256;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Positional parameters of a JSON-RPC call.
pub type Params = Vec<Value>;

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code (some nodes omit it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Human readable message
    pub message: String,

    /// Extra error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decoded JSON-RPC response.
///
/// Either `result` or `error` is set. A missing `result` and a JSON `null`
/// result are the same thing here: the call succeeded but returned nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Request id echoed by the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Successful result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl RpcResponse {
    /// Successful response carrying `result`.
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// Error response.
    pub fn failure(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            ..Self::default()
        }
    }

    /// Whether the node answered with an error payload.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the decoded result, surfacing error payloads as [`RpcError::Rpc`].
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Named block tags accepted wherever a block number is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Earliest,
    Latest,
    Pending,
    Safe,
    Finalized,
}

impl BlockTag {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Pending => "pending",
            Self::Safe => "safe",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockTag {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "pending" => Ok(Self::Pending),
            "safe" => Ok(Self::Safe),
            "finalized" => Ok(Self::Finalized),
            other => Err(RpcError::InvalidConfig(format!("unknown block tag: {other}"))),
        }
    }
}

/// A block reference found in request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Number(u64),
    Tag(BlockTag),
    Hash(B256),
}

impl BlockId {
    /// Interpret a single parameter as a block reference.
    ///
    /// Accepts tags, hex quantities, JSON integers and 32-byte hex hashes.
    pub fn from_param(param: &Value) -> Option<Self> {
        if let Some(s) = param.as_str() {
            if let Ok(tag) = s.parse::<BlockTag>() {
                return Some(Self::Tag(tag));
            }
            // 0x + 64 hex chars is a hash, anything shorter a quantity
            if s.len() == 66 {
                return parse_hash(s).map(Self::Hash);
            }
        }
        parse_quantity(param).map(Self::Number)
    }
}

/// Minimal block header fields used by middleware and cache validation.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block timestamp in seconds (hex string in JSON)
    #[serde(rename = "timestamp", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub timestamp: Option<u64>,

    /// Block gas limit (hex string in JSON)
    #[serde(rename = "gasLimit", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub gas_limit: Option<u64>,

    /// EIP-1559 base fee in wei; absent before London
    #[serde(rename = "baseFeePerGas", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub base_fee_per_gas: Option<u64>,
}

impl BlockHeader {
    /// Decode a block result, rejecting `null`.
    pub fn from_result(result: Value) -> Result<Self> {
        if result.is_null() {
            return Err(RpcError::InvalidResponse("block not found".to_string()));
        }
        Ok(serde_json::from_value(result)?)
    }
}

/// Parse a hex quantity (`"0x1a"`) or a JSON integer into a u64.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => {
            let digits = s.strip_prefix("0x")?;
            if digits.is_empty() {
                return None;
            }
            u64::from_str_radix(digits, 16).ok()
        }
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Encode a u64 as a hex quantity.
pub fn to_quantity(n: u64) -> Value {
    Value::String(format!("0x{:x}", n))
}

/// Parse a 32-byte hex hash (with or without 0x prefix).
pub fn parse_hash(s: &str) -> Option<B256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(pad_hex_string(s)).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(B256::from_slice(&bytes))
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_quantity(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {}", value)))
}

/// Deserialize an optional hex string to u64.
fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        Some(value) => parse_quantity(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {}", value))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_quantity(&json!("0x1a")), Some(26));
        assert_eq!(parse_quantity(&json!(7)), Some(7));
        assert_eq!(parse_quantity(&json!("0x")), None);
        assert_eq!(parse_quantity(&json!("12")), None);
        assert_eq!(parse_quantity(&json!(null)), None);
    }

    #[test]
    fn test_to_quantity() {
        assert_eq!(to_quantity(0), json!("0x0"));
        assert_eq!(to_quantity(255), json!("0xff"));
    }

    #[test]
    fn test_block_id_from_param() {
        assert_eq!(
            BlockId::from_param(&json!("latest")),
            Some(BlockId::Tag(BlockTag::Latest))
        );
        assert_eq!(BlockId::from_param(&json!("0x2")), Some(BlockId::Number(2)));
        assert_eq!(BlockId::from_param(&json!(5)), Some(BlockId::Number(5)));
        assert_eq!(
            BlockId::from_param(&json!(format!("0x{}", "00".repeat(32)))),
            Some(BlockId::Hash(B256::ZERO))
        );
        assert_eq!(BlockId::from_param(&json!({"blockHash": "0x0"})), None);
        assert_eq!(BlockId::from_param(&json!("tomorrow")), None);
    }

    #[test]
    fn test_into_result() {
        let ok = RpcResponse::success(json!("0x1"));
        assert_eq!(ok.into_result().unwrap(), json!("0x1"));

        let empty = RpcResponse::default();
        assert_eq!(empty.into_result().unwrap(), Value::Null);

        let err = RpcResponse::failure(Some(-32000), "header not found");
        match err.into_result() {
            Err(RpcError::Rpc { code, message, .. }) => {
                assert_eq!(code, Some(-32000));
                assert_eq!(message, "header not found");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_response_deserialize() {
        let resp: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(!resp.is_error());
        assert_eq!(resp.result, None);

        let resp: RpcResponse = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": 2, "error": {"message": "nope"}}),
        )
        .unwrap();
        assert!(resp.is_error());
        assert_eq!(resp.error.unwrap().code, None);
    }

    #[test]
    fn test_block_header_from_result() {
        let header = BlockHeader::from_result(json!({
            "number": "0x10",
            "timestamp": "0x64",
            "gasLimit": "0x1c9c380",
            "hash": "0xabc"
        }))
        .unwrap();
        assert_eq!(header.number, 16);
        assert_eq!(header.timestamp, Some(100));
        assert_eq!(header.gas_limit, Some(30_000_000));
        assert_eq!(header.base_fee_per_gas, None);

        let london = BlockHeader::from_result(json!({"number": "0x1", "baseFeePerGas": "0x7"})).unwrap();
        assert_eq!(london.base_fee_per_gas, Some(7));

        assert!(BlockHeader::from_result(Value::Null).is_err());
    }
}
