//! Client configuration loading
//!
//! Handles loading the client configuration (JSON) and cache allow-lists
//! (one method name per line) from files.

use crate::cache::SimpleCache;
use crate::caching::RequestCache;
use crate::error::RpcError;
use crate::middleware::StaleCheckMiddleware;
use crate::policy::ValidationThreshold;
use crate::transport::{RetryConfig, REQUEST_RETRY_ALLOWLIST};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Retry settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts per call
    pub retries: u32,

    /// Fixed delay between attempts, in milliseconds
    pub backoff_ms: u64,

    /// Methods or namespaces to retry; the built-in list when absent
    pub method_allowlist: Option<Vec<String>>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_ms: 125,
            method_allowlist: None,
        }
    }
}

/// Request manager configuration.
///
/// # Example file format:
/// ```json
/// {
///   "cache_enabled": true,
///   "cache_capacity": 1024,
///   "validation_threshold": "safe",
///   "cache_allow_list": ["eth_getCode"],
///   "retry": { "retries": 3, "backoff_ms": 250 },
///   "stale_check_delay_secs": 300
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Enable the request cache
    pub cache_enabled: bool,

    /// Maximum cached entries (unbounded when absent)
    pub cache_capacity: Option<usize>,

    /// Block a response must be at or before to be cached; `null` disables validation
    pub validation_threshold: Option<ValidationThreshold>,

    /// Replaces the built-in registry as the set of cacheable methods
    pub cacheable_methods: Option<Vec<String>>,

    /// Extra methods to cache on top of the registry (or `cacheable_methods`)
    pub cache_allow_list: Vec<String>,

    /// Transport retry settings
    pub retry: RetrySettings,

    /// Install the stale chain check with this allowed delay
    pub stale_check_delay_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_capacity: None,
            validation_threshold: Some(ValidationThreshold::Finalized),
            cacheable_methods: None,
            cache_allow_list: Vec::new(),
            retry: RetrySettings::default(),
            stale_check_delay_secs: None,
        }
    }
}

impl ClientConfig {
    /// Check every setting, reporting the first problem found.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cache_capacity == Some(0) {
            return Err(RpcError::InvalidConfig(
                "cache_capacity must be positive".to_string(),
            ));
        }
        if let Some(bad) = self
            .cache_allow_list
            .iter()
            .find(|method| !is_valid_method_name(method))
        {
            return Err(RpcError::InvalidConfig(format!(
                "invalid method name in cache_allow_list: {:?}",
                bad
            )));
        }
        if let Some(bad) = self
            .cacheable_methods
            .iter()
            .flatten()
            .find(|method| !is_valid_method_name(method))
        {
            return Err(RpcError::InvalidConfig(format!(
                "invalid method name in cacheable_methods: {:?}",
                bad
            )));
        }
        self.retry_config()?;
        self.stale_check()?;
        Ok(())
    }

    /// Retry configuration for the transport wrapper.
    pub fn retry_config(&self) -> crate::error::Result<RetryConfig> {
        let allowlist = match &self.retry.method_allowlist {
            Some(methods) => methods.clone(),
            None => REQUEST_RETRY_ALLOWLIST.iter().map(|m| m.to_string()).collect(),
        };
        RetryConfig::new(
            self.retry.retries,
            Duration::from_millis(self.retry.backoff_ms),
            allowlist,
        )
    }

    /// Cache state for a new manager: a fresh cache when enabled, with the
    /// configured threshold and cacheable methods.
    pub fn request_cache(&self) -> crate::error::Result<RequestCache> {
        let request_cache = if self.cache_enabled {
            let cache = match self.cache_capacity {
                Some(capacity) => {
                    let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
                        RpcError::InvalidConfig("cache_capacity must be positive".to_string())
                    })?;
                    SimpleCache::with_capacity(capacity)
                }
                None => SimpleCache::new(),
            };
            RequestCache::enabled(Arc::new(cache), self.validation_threshold)
        } else {
            RequestCache::disabled(self.validation_threshold)
        };

        if let Some(methods) = &self.cacheable_methods {
            request_cache.policy().set_cacheable(methods.iter().map(String::as_str));
        }
        for method in &self.cache_allow_list {
            request_cache.policy().allow(method.as_str());
        }
        Ok(request_cache)
    }

    /// The stale chain middleware, if configured.
    pub fn stale_check(&self) -> crate::error::Result<Option<StaleCheckMiddleware>> {
        self.stale_check_delay_secs
            .map(|secs| StaleCheckMiddleware::new(Duration::from_secs(secs)))
            .transpose()
    }
}

/// Load and validate a client configuration file.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: ClientConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Load a cache allow-list from a file.
///
/// Each line holds one JSON-RPC method name.
/// Empty lines and lines starting with '#' are ignored.
///
/// # Example file format:
/// ```text
/// eth_getCode
/// # account state at a pinned block
/// eth_getStorageAt
/// ```
pub fn load_allow_list(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read allow-list file: {:?}", path))?;

    let mut methods = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if !is_valid_method_name(line) {
            anyhow::bail!("Invalid method name on line {}: {}", line_num + 1, line);
        }

        methods.push(line.to_string());
    }

    if methods.is_empty() {
        anyhow::bail!("Allow-list is empty (no method names found)");
    }

    Ok(methods)
}

/// JSON-RPC method names are `namespace_name` style identifiers.
fn is_valid_method_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(!config.cache_enabled);
        assert_eq!(config.validation_threshold, Some(ValidationThreshold::Finalized));
        config.validate().unwrap();

        let retry = config.retry_config().unwrap();
        assert_eq!(retry.retries(), 5);
        assert_eq!(retry.backoff(), Duration::from_millis(125));
    }

    #[test]
    fn test_load_config() {
        let file = write_file(
            r#"{
                "cache_enabled": true,
                "cache_capacity": 16,
                "validation_threshold": "safe",
                "cache_allow_list": ["eth_getCode"],
                "retry": { "retries": 2, "backoff_ms": 10 },
                "stale_check_delay_secs": 60
            }"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.cache_capacity, Some(16));
        assert_eq!(config.validation_threshold, Some(ValidationThreshold::Safe));

        let cache = config.request_cache().unwrap();
        assert!(cache.is_enabled());
        assert_eq!(cache.cache().unwrap().capacity(), Some(16));
        assert!(cache.policy().category("eth_getCode").is_some());
        assert!(cache.policy().category("eth_chainId").is_some());

        let stale = config.stale_check().unwrap().unwrap();
        assert_eq!(stale.allowable_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_cacheable_methods_replace_registry() {
        let file = write_file(
            r#"{
                "cache_enabled": true,
                "cacheable_methods": ["eth_getBlockByNumber"],
                "cache_allow_list": ["eth_getCode"]
            }"#,
        );
        let cache = load_config(file.path()).unwrap().request_cache().unwrap();
        assert_eq!(
            cache.cacheable_methods(),
            vec!["eth_getBlockByNumber".to_string(), "eth_getCode".to_string()]
        );
        assert!(cache.target("eth_chainId", &[]).is_none());
    }

    #[test]
    fn test_null_threshold_disables_validation() {
        let file = write_file(r#"{ "validation_threshold": null }"#);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.validation_threshold, None);
    }

    #[test]
    fn test_rejects_bad_config() {
        for contents in [
            r#"{ "cache_capacity": 0 }"#,
            r#"{ "validation_threshold": "latest" }"#,
            r#"{ "retry": { "retries": 0 } }"#,
            r#"{ "retry": { "backoff_ms": 0 } }"#,
            r#"{ "stale_check_delay_secs": 0 }"#,
            r#"{ "cache_allow_list": ["eth call"] }"#,
            r#"{ "cacheable_methods": [""] }"#,
            r#"{ "unknown_field": true }"#,
        ] {
            let file = write_file(contents);
            assert!(load_config(file.path()).is_err(), "accepted: {}", contents);
        }
    }

    #[test]
    fn test_load_allow_list() {
        let file = write_file("eth_getCode\n# This is a comment\n\n  eth_getStorageAt  \n");
        let methods = load_allow_list(file.path()).unwrap();
        assert_eq!(methods, vec!["eth_getCode", "eth_getStorageAt"]);
    }

    #[test]
    fn test_load_allow_list_rejects_bad_lines() {
        let file = write_file("eth_getCode\neth getCode\n");
        assert!(load_allow_list(file.path()).is_err());

        let file = write_file("# only comments\n");
        assert!(load_allow_list(file.path()).is_err());
    }

    #[test]
    fn test_is_valid_method_name() {
        assert!(is_valid_method_name("eth_chainId"));
        assert!(is_valid_method_name("web3_clientVersion"));
        assert!(!is_valid_method_name(""));
        assert!(!is_valid_method_name("_private"));
        assert!(!is_valid_method_name("eth-chainId"));
    }
}
