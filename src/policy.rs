//! Cacheability policy
//!
//! Decides whether a fresh response may be stored in the request cache.
//!
//! Endpoints fall into groups by where their block reference lives:
//! - block number in the first parameter
//! - block hash in the first parameter
//! - block number in the decoded result
//! - no block reference at all (chain constants)
//!
//! With a validation threshold configured, a response is cached only when its
//! block is at or before the current `finalized` (or `safe`) block, i.e. it
//! can no longer be reorganized away. Threshold and hash lookups are direct
//! transport round trips; they never go through middleware or the cache.

use crate::error::{Result, RpcError};
use crate::transport::{AsyncTransport, Transport};
use crate::types::{parse_quantity, BlockHeader, BlockId, BlockTag, Params, RpcResponse};
use alloy_primitives::B256;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Methods whose first parameter is a block number or tag.
pub const BLOCKNUM_IN_PARAMS: &[&str] = &[
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByNumber",
    "eth_getRawTransactionByBlockNumberAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getUncleByBlockNumberAndIndex",
    "eth_getUncleCountByBlockNumber",
];

/// Methods whose first parameter is a block hash.
pub const BLOCKHASH_IN_PARAMS: &[&str] = &[
    "eth_getBlockTransactionCountByHash",
    "eth_getRawTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getUncleByBlockHashAndIndex",
    "eth_getUncleCountByBlockHash",
];

/// Methods whose result carries the block number.
pub const BLOCKNUM_IN_RESULT: &[&str] = &[
    "eth_getBlockByHash",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
];

/// Methods that never depend on a block.
pub const UNVALIDATED_REQUESTS: &[&str] = &["eth_chainId", "net_version", "web3_clientVersion"];

/// How an endpoint's freshness is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointCategory {
    BlockNumberInParams,
    BlockHashInParams,
    BlockNumberInResult,
    /// Cached without a freshness check
    Unvalidated,
}

/// Look up a method in the static cacheable-endpoint registry.
pub fn registry_category(method: &str) -> Option<EndpointCategory> {
    if BLOCKNUM_IN_PARAMS.contains(&method) {
        Some(EndpointCategory::BlockNumberInParams)
    } else if BLOCKHASH_IN_PARAMS.contains(&method) {
        Some(EndpointCategory::BlockHashInParams)
    } else if BLOCKNUM_IN_RESULT.contains(&method) {
        Some(EndpointCategory::BlockNumberInResult)
    } else if UNVALIDATED_REQUESTS.contains(&method) {
        Some(EndpointCategory::Unvalidated)
    } else {
        None
    }
}

/// Every method in the static registry.
pub fn cacheable_requests() -> impl Iterator<Item = &'static str> {
    BLOCKNUM_IN_PARAMS
        .iter()
        .chain(BLOCKHASH_IN_PARAMS)
        .chain(BLOCKNUM_IN_RESULT)
        .chain(UNVALIDATED_REQUESTS)
        .copied()
}

/// Block a response must be at or before to be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationThreshold {
    Finalized,
    Safe,
}

impl ValidationThreshold {
    pub const fn tag(&self) -> BlockTag {
        match self {
            Self::Finalized => BlockTag::Finalized,
            Self::Safe => BlockTag::Safe,
        }
    }
}

impl fmt::Display for ValidationThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().as_str())
    }
}

impl FromStr for ValidationThreshold {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "finalized" => Ok(Self::Finalized),
            "safe" => Ok(Self::Safe),
            other => Err(RpcError::InvalidConfig(format!(
                "unknown validation threshold '{other}', expected 'finalized' or 'safe'"
            ))),
        }
    }
}

/// What a response's freshness hinges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockReference {
    /// Cacheable without a threshold lookup
    Always,
    /// Never cacheable
    Never,
    Number(u64),
    Hash(B256),
}

fn block_reference(category: EndpointCategory, params: &[Value], result: &Value) -> BlockReference {
    match category {
        EndpointCategory::Unvalidated => BlockReference::Always,
        EndpointCategory::BlockNumberInParams => match params.first().and_then(BlockId::from_param) {
            Some(BlockId::Tag(BlockTag::Earliest)) => BlockReference::Always,
            Some(BlockId::Number(n)) => BlockReference::Number(n),
            // latest / pending / safe / finalized move with the chain
            _ => BlockReference::Never,
        },
        EndpointCategory::BlockHashInParams => match params.first().and_then(BlockId::from_param) {
            Some(BlockId::Hash(hash)) => BlockReference::Hash(hash),
            _ => BlockReference::Never,
        },
        EndpointCategory::BlockNumberInResult => result
            .get("number")
            .or_else(|| result.get("blockNumber"))
            .and_then(parse_quantity)
            .map_or(BlockReference::Never, BlockReference::Number),
    }
}

fn block_number_from(method: &str, response: Result<RpcResponse>) -> Option<u64> {
    let header = response
        .and_then(|r| r.into_result())
        .and_then(BlockHeader::from_result);
    match header {
        Ok(header) => Some(header.number),
        Err(err) => {
            debug!("Side call {} unusable for cache validation: {}", method, err);
            None
        }
    }
}

/// Per-client caching rules.
///
/// Holds the mutable set of cacheable methods, seeded from the static
/// registry, and the configured validation threshold.
pub struct CachePolicy {
    threshold: Option<ValidationThreshold>,
    cacheable: RwLock<BTreeSet<String>>,
}

impl CachePolicy {
    pub fn new(threshold: Option<ValidationThreshold>) -> Self {
        Self {
            threshold,
            cacheable: RwLock::new(cacheable_requests().map(str::to_string).collect()),
        }
    }

    pub fn threshold(&self) -> Option<ValidationThreshold> {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Option<ValidationThreshold>) {
        self.threshold = threshold;
    }

    /// Opt `method` into caching.
    pub fn allow(&self, method: impl Into<String>) {
        self.cacheable.write().insert(method.into());
    }

    /// Stop caching `method`; returns whether it was cacheable.
    pub fn disallow(&self, method: &str) -> bool {
        self.cacheable.write().remove(method)
    }

    /// Replace the whole cacheable set.
    pub fn set_cacheable<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.cacheable.write() = methods.into_iter().map(Into::into).collect();
    }

    /// Cacheable methods, sorted.
    pub fn cacheable_methods(&self) -> Vec<String> {
        self.cacheable.read().iter().cloned().collect()
    }

    /// Category of `method`, or `None` if it is not cacheable at all.
    ///
    /// Methods outside the registry have no freshness rule.
    pub fn category(&self, method: &str) -> Option<EndpointCategory> {
        if !self.cacheable.read().contains(method) {
            return None;
        }
        Some(registry_category(method).unwrap_or(EndpointCategory::Unvalidated))
    }

    pub fn is_cacheable_endpoint(&self, method: &str) -> bool {
        self.category(method).is_some()
    }

    /// Pre-threshold part of the decision.
    ///
    /// `Err(decision)` is final; `Ok(reference)` still needs side calls.
    fn classify(
        &self,
        method: &str,
        params: &[Value],
        result: Option<&Value>,
    ) -> std::result::Result<(ValidationThreshold, BlockReference), bool> {
        let Some(category) = self.category(method) else {
            return Err(false);
        };
        let result = match result {
            Some(result) if !result.is_null() => result,
            _ => return Err(false),
        };
        let Some(threshold) = self.threshold else {
            return Err(true);
        };
        match block_reference(category, params, result) {
            BlockReference::Always => Err(true),
            BlockReference::Never => Err(false),
            reference => Ok((threshold, reference)),
        }
    }

    /// Whether a response may be cached, resolving block references with blocking calls.
    pub fn is_cacheable(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: &[Value],
        result: Option<&Value>,
    ) -> bool {
        let (threshold, reference) = match self.classify(method, params, result) {
            Ok(pending) => pending,
            Err(decision) => return decision,
        };

        let block_number = match reference {
            BlockReference::Number(n) => Some(n),
            BlockReference::Hash(hash) => {
                let response = transport.make_request("eth_getBlockByHash", hash_params(hash));
                block_number_from("eth_getBlockByHash", response)
            }
            BlockReference::Always | BlockReference::Never => None,
        };
        let Some(block_number) = block_number else {
            return false;
        };

        let response = transport.make_request("eth_getBlockByNumber", threshold_params(threshold));
        let Some(threshold_number) = block_number_from("eth_getBlockByNumber", response) else {
            return false;
        };
        within_threshold(method, block_number, threshold, threshold_number)
    }

    /// Async counterpart of [`CachePolicy::is_cacheable`].
    pub async fn async_is_cacheable(
        &self,
        transport: &dyn AsyncTransport,
        method: &str,
        params: &[Value],
        result: Option<&Value>,
    ) -> bool {
        let (threshold, reference) = match self.classify(method, params, result) {
            Ok(pending) => pending,
            Err(decision) => return decision,
        };

        let block_number = match reference {
            BlockReference::Number(n) => Some(n),
            BlockReference::Hash(hash) => {
                let response = transport
                    .make_request("eth_getBlockByHash", hash_params(hash))
                    .await;
                block_number_from("eth_getBlockByHash", response)
            }
            BlockReference::Always | BlockReference::Never => None,
        };
        let Some(block_number) = block_number else {
            return false;
        };

        let response = transport
            .make_request("eth_getBlockByNumber", threshold_params(threshold))
            .await;
        let Some(threshold_number) = block_number_from("eth_getBlockByNumber", response) else {
            return false;
        };
        within_threshold(method, block_number, threshold, threshold_number)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Some(ValidationThreshold::Finalized))
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("threshold", &self.threshold)
            .field("cacheable", &*self.cacheable.read())
            .finish()
    }
}

fn hash_params(hash: B256) -> Params {
    vec![json!(format!("0x{}", hex::encode(hash))), json!(false)]
}

fn threshold_params(threshold: ValidationThreshold) -> Params {
    vec![json!(threshold.tag().as_str()), json!(false)]
}

fn within_threshold(
    method: &str,
    block_number: u64,
    threshold: ValidationThreshold,
    threshold_number: u64,
) -> bool {
    let cacheable = block_number <= threshold_number;
    debug!(
        "{} references block {}, {} block is {}: {}",
        method,
        block_number,
        threshold,
        threshold_number,
        if cacheable { "cacheable" } else { "not cacheable" }
    );
    cacheable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use rstest::rstest;

    fn zero_hash() -> String {
        format!("0x{}", "00".repeat(32))
    }

    /// Mock whose finalized/safe block is 0x2.
    fn node_at_threshold_two() -> MockTransport {
        let mock = MockTransport::new();
        mock.set_handler("eth_getBlockByNumber", |_, params| match params[0].as_str() {
            Some("finalized") | Some("safe") => RpcResponse::success(json!({"number": "0x2"})),
            _ => RpcResponse::success(json!({"number": params[0].clone()})),
        });
        mock
    }

    #[test]
    fn test_registry_categories() {
        assert_eq!(
            registry_category("eth_getBlockByNumber"),
            Some(EndpointCategory::BlockNumberInParams)
        );
        assert_eq!(
            registry_category("eth_getUncleCountByBlockHash"),
            Some(EndpointCategory::BlockHashInParams)
        );
        assert_eq!(
            registry_category("eth_getTransactionReceipt"),
            Some(EndpointCategory::BlockNumberInResult)
        );
        assert_eq!(registry_category("eth_chainId"), Some(EndpointCategory::Unvalidated));
        assert_eq!(registry_category("eth_sendRawTransaction"), None);
        assert_eq!(cacheable_requests().count(), 17);
    }

    #[test]
    fn test_threshold_parsing() {
        assert_eq!("finalized".parse::<ValidationThreshold>().unwrap(), ValidationThreshold::Finalized);
        assert_eq!("safe".parse::<ValidationThreshold>().unwrap(), ValidationThreshold::Safe);
        assert!("latest".parse::<ValidationThreshold>().is_err());
        assert_eq!(CachePolicy::default().threshold(), Some(ValidationThreshold::Finalized));
    }

    #[test]
    fn test_unknown_method_not_cacheable() {
        let policy = CachePolicy::new(None);
        let mock = MockTransport::new();
        assert!(!policy.is_cacheable(&mock, "fake_endpoint", &[], Some(&json!(1))));
    }

    #[test]
    fn test_allow_list_opts_in_without_freshness_check() {
        let policy = CachePolicy::default();
        let mock = MockTransport::new();
        policy.allow("fake_endpoint");
        assert!(policy.is_cacheable(&mock, "fake_endpoint", &[], Some(&json!(1))));
        assert!(mock.calls().is_empty());

        assert!(policy.disallow("fake_endpoint"));
        assert!(!policy.is_cacheable(&mock, "fake_endpoint", &[], Some(&json!(1))));
    }

    #[test]
    fn test_registry_methods_can_be_disallowed() {
        let policy = CachePolicy::new(None);
        let mock = MockTransport::new();
        assert_eq!(policy.cacheable_methods().len(), 17);

        assert!(policy.disallow("eth_chainId"));
        assert!(!policy.disallow("eth_chainId"));
        assert!(!policy.is_cacheable(&mock, "eth_chainId", &[], Some(&json!("0x1"))));
        assert_eq!(policy.category("eth_chainId"), None);

        // Re-allowing restores the registry category
        policy.allow("eth_getBlockByNumber");
        assert_eq!(
            policy.category("eth_getBlockByNumber"),
            Some(EndpointCategory::BlockNumberInParams)
        );
    }

    #[test]
    fn test_set_cacheable_replaces_set() {
        let policy = CachePolicy::new(None);
        policy.set_cacheable(["fake_endpoint"]);
        assert_eq!(policy.cacheable_methods(), vec!["fake_endpoint".to_string()]);
        assert_eq!(policy.category("eth_chainId"), None);
        assert_eq!(policy.category("fake_endpoint"), Some(EndpointCategory::Unvalidated));

        // A registry method re-added keeps its freshness rule
        policy.set_cacheable(["eth_getTransactionReceipt"]);
        assert_eq!(
            policy.category("eth_getTransactionReceipt"),
            Some(EndpointCategory::BlockNumberInResult)
        );
    }

    #[test]
    fn test_null_result_never_cacheable() {
        let policy = CachePolicy::new(None);
        let mock = MockTransport::new();
        assert!(!policy.is_cacheable(&mock, "eth_chainId", &[], None));
        assert!(!policy.is_cacheable(&mock, "eth_chainId", &[], Some(&Value::Null)));
    }

    #[rstest]
    #[case::genesis("0x0", true)]
    #[case::one("0x1", true)]
    #[case::at_threshold("0x2", true)]
    #[case::past_threshold("0x3", false)]
    #[case::far_past("0x5", false)]
    fn test_block_number_in_params(
        #[values(ValidationThreshold::Finalized, ValidationThreshold::Safe)] threshold: ValidationThreshold,
        #[case] blocknum: &str,
        #[case] expected: bool,
    ) {
        let policy = CachePolicy::new(Some(threshold));
        let mock = node_at_threshold_two();
        let params = vec![json!(blocknum), json!(false)];
        let result = json!({"number": blocknum});
        assert_eq!(
            policy.is_cacheable(&mock, "eth_getBlockByNumber", &params, Some(&result)),
            expected
        );
    }

    #[rstest]
    #[case::earliest("earliest", true)]
    #[case::latest("latest", false)]
    #[case::pending("pending", false)]
    #[case::safe("safe", false)]
    #[case::finalized("finalized", false)]
    fn test_block_tags(#[case] tag: &str, #[case] expected: bool) {
        let policy = CachePolicy::default();
        let mock = node_at_threshold_two();
        let params = vec![json!(tag), json!(false)];
        assert_eq!(
            policy.is_cacheable(&mock, "eth_getUncleCountByBlockNumber", &params, Some(&json!("0x0"))),
            expected
        );
        // Tags are decided without asking the node
        assert!(mock.calls().is_empty());
    }

    #[rstest]
    #[case::before("0x1", true)]
    #[case::at("0x2", true)]
    #[case::after("0x3", false)]
    fn test_block_hash_resolved_via_side_call(#[case] blocknum: &'static str, #[case] expected: bool) {
        let policy = CachePolicy::default();
        let mock = node_at_threshold_two();
        mock.set_result("eth_getBlockByHash", json!({"number": blocknum}));

        let params = vec![json!(zero_hash()), json!(false)];
        assert_eq!(
            policy.is_cacheable(&mock, "eth_getUncleCountByBlockHash", &params, Some(&json!("0x0"))),
            expected
        );
        assert_eq!(mock.call_count("eth_getBlockByHash"), 1);
        assert_eq!(mock.calls()[0].1[0], json!(zero_hash()));
    }

    #[test]
    fn test_unknown_block_hash_not_cacheable() {
        let policy = CachePolicy::default();
        let mock = node_at_threshold_two();
        mock.set_result("eth_getBlockByHash", Value::Null);
        let params = vec![json!(zero_hash())];
        assert!(!policy.is_cacheable(&mock, "eth_getUncleCountByBlockHash", &params, Some(&json!("0x0"))));
    }

    #[rstest]
    #[case::block_field("eth_getBlockByHash", json!({"number": "0x1"}), true)]
    #[case::receipt_field("eth_getTransactionReceipt", json!({"blockNumber": "0x2"}), true)]
    #[case::too_new("eth_getTransactionByHash", json!({"blockNumber": "0x4"}), false)]
    #[case::missing_field("eth_getTransactionByHash", json!({"hash": "0x1"}), false)]
    #[case::not_an_object("eth_getTransactionReceipt", json!("0x1"), false)]
    fn test_block_number_in_result(#[case] method: &str, #[case] result: Value, #[case] expected: bool) {
        let policy = CachePolicy::default();
        let mock = node_at_threshold_two();
        assert_eq!(policy.is_cacheable(&mock, method, &[json!("0xabc")], Some(&result)), expected);
    }

    #[test]
    fn test_threshold_lookup_failure_is_not_cacheable() {
        let policy = CachePolicy::default();
        let mock = MockTransport::new();
        mock.set_error("eth_getBlockByNumber", -32000, "finalized block not found");
        let params = vec![json!("0x1")];
        assert!(!policy.is_cacheable(&mock, "eth_getBlockByNumber", &params, Some(&json!({"number": "0x1"}))));
    }

    #[test]
    fn test_disabled_threshold_skips_side_calls() {
        let policy = CachePolicy::new(None);
        let mock = MockTransport::new();
        for blocknum in ["0x0", "0x3", "0x5"] {
            let params = vec![json!(blocknum), json!(false)];
            assert!(policy.is_cacheable(&mock, "eth_getBlockByNumber", &params, Some(&json!({"number": blocknum}))));
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let policy = CachePolicy::new(Some(ValidationThreshold::Safe));
        let mock = node_at_threshold_two();
        mock.set_result("eth_getBlockByHash", json!({"number": "0x3"}));

        let cases = [
            ("eth_getBlockByNumber", vec![json!("0x2")], json!({"number": "0x2"})),
            ("eth_getBlockByNumber", vec![json!("0x3")], json!({"number": "0x3"})),
            ("eth_getBlockByNumber", vec![json!("pending")], json!({"number": "0x3"})),
            ("eth_getUncleCountByBlockHash", vec![json!(zero_hash())], json!("0x0")),
            ("eth_getTransactionReceipt", vec![json!("0xabc")], json!({"blockNumber": "0x1"})),
        ];
        for (method, params, result) in cases {
            let sync = policy.is_cacheable(&mock, method, &params, Some(&result));
            let async_ = policy.async_is_cacheable(&mock, method, &params, Some(&result)).await;
            assert_eq!(sync, async_, "{method} {params:?}");
        }
    }
}
