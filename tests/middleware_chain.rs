//! Middleware onion behaviour seen through the request managers.

use parking_lot::Mutex;
use rpc_onion::middleware::{
    BufferedGasEstimateMiddleware, ExtraDataToPoaMiddleware, StaleCheckMiddleware,
};
use rpc_onion::testing::MockTransport;
use rpc_onion::transport::RetryingTransport;
use rpc_onion::{
    AsyncRequestManager, ClientConfig, FnMiddleware, RequestManager, RetryConfig, RpcError,
    RpcResponse, SimpleCache,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// Middleware tagging params on the way in and string results on the way out.
fn tagging(tag: &'static str, log: &Log) -> FnMiddleware {
    let request_log = Arc::clone(log);
    let response_log = Arc::clone(log);
    FnMiddleware::new()
        .on_request(move |method, mut params| {
            request_log.lock().push(format!("{tag}:req:{method}"));
            params.push(json!(tag));
            Ok(params)
        })
        .on_response(move |method, mut response| {
            response_log.lock().push(format!("{tag}:resp:{method}"));
            if let Some(Value::String(s)) = response.result.as_mut() {
                s.push_str(tag);
            }
            Ok(response)
        })
}

/// Answers `echo` with its string params concatenated.
fn echo_transport() -> Arc<MockTransport> {
    let mock = Arc::new(MockTransport::new());
    mock.set_handler("echo", |_, params| {
        let joined: String = params.iter().filter_map(Value::as_str).collect();
        RpcResponse::success(json!(joined))
    });
    mock
}

#[test]
fn test_chain_ordering_through_manager() {
    let log: Log = Arc::default();
    let mock = echo_transport();
    let mut manager = RequestManager::new(Arc::clone(&mock));
    manager.middleware_onion_mut().add("m1", tagging("1", &log)).unwrap();
    manager.middleware_onion_mut().add("m2", tagging("2", &log)).unwrap();
    manager
        .middleware_onion_mut()
        .inject("m0", tagging("0", &log), 0)
        .unwrap();

    let result = manager.request_blocking("echo", vec![]).unwrap();

    // Request hooks ran 0, 1, 2; response hooks 2, 1, 0
    assert_eq!(result, json!("012210"));
    assert_eq!(
        *log.lock(),
        vec![
            "0:req:echo",
            "1:req:echo",
            "2:req:echo",
            "2:resp:echo",
            "1:resp:echo",
            "0:resp:echo"
        ]
    );
}

#[test]
fn test_hook_error_propagates_and_skips_transport() {
    let mock = echo_transport();
    let mut manager = RequestManager::new(Arc::clone(&mock));
    manager
        .middleware_onion_mut()
        .add(
            "deny",
            FnMiddleware::new()
                .on_request(|method, _| Err(RpcError::InvalidConfig(format!("{method} denied")))),
        )
        .unwrap();

    let err = manager.request_blocking("echo", vec![]).unwrap_err();
    assert_eq!(err.to_string(), RpcError::InvalidConfig("echo denied".to_string()).to_string());
    assert!(mock.calls().is_empty());
}

#[test]
fn test_batch_ordering_with_mixed_errors() {
    let log: Log = Arc::default();
    let mock = echo_transport();
    mock.set_error("eth_fail", -32000, "boom");
    let mut manager = RequestManager::new(Arc::clone(&mock));
    manager.middleware_onion_mut().add("m1", tagging("1", &log)).unwrap();

    let mut batch = manager.batch().unwrap();
    batch
        .add("echo", vec![json!("a")])
        .add("eth_fail", vec![])
        .add("echo", vec![json!("b")]);
    let results = batch.execute().unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap(), &json!("a11"));
    match &results[1] {
        Err(RpcError::Rpc { code, message, .. }) => {
            assert_eq!(*code, Some(-32000));
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(results[2].as_ref().unwrap(), &json!("b11"));

    // One round trip, hooks applied per element
    assert_eq!(mock.batch_count(), 1);
    assert_eq!(log.lock().len(), 6);
}

#[test]
fn test_second_batch_rejected_while_first_is_open() {
    let mock = echo_transport();
    let manager = RequestManager::new(Arc::clone(&mock));

    let first = manager.batch().unwrap();
    assert!(matches!(manager.batch(), Err(RpcError::BatchInProgress)));
    drop(first);
    assert!(manager.batch().is_ok());
}

#[test]
fn test_batch_transport_failure_fails_whole_batch() {
    let mock = echo_transport();
    mock.fail_batches(1);
    let manager = RequestManager::new(Arc::clone(&mock));

    let err = manager
        .make_batch_request(vec![("echo".to_string(), vec![])])
        .unwrap_err();
    assert!(err.is_transport());
}

#[test]
fn test_retrying_transport_under_manager() {
    let mock = Arc::new(MockTransport::new());
    mock.set_result("eth_blockNumber", json!("0x10"));
    mock.fail_transport("eth_blockNumber", 2);

    let retry = RetryConfig::new(3, Duration::from_millis(1), vec!["eth".to_string()]).unwrap();
    let manager = RequestManager::new(RetryingTransport::new(Arc::clone(&mock), retry));

    assert_eq!(
        manager.request_blocking("eth_blockNumber", vec![]).unwrap(),
        json!("0x10")
    );
    assert_eq!(mock.call_count("eth_blockNumber"), 3);
}

#[test]
fn test_builtin_middlewares_compose() {
    let mock = Arc::new(MockTransport::new());
    mock.set_result("eth_estimateGas", json!("0x5208"));
    mock.set_handler("eth_getBlockByNumber", |_, _| {
        RpcResponse::success(json!({
            "number": "0x10",
            "gasLimit": "0x1c9c380",
            "extraData": "0xd883010d"
        }))
    });
    mock.set_handler("eth_sendTransaction", |_, params| {
        RpcResponse::success(params[0]["gas"].clone())
    });

    let mut manager = RequestManager::new(Arc::clone(&mock));
    manager
        .middleware_onion_mut()
        .add("gas_estimate", BufferedGasEstimateMiddleware)
        .unwrap();
    manager
        .middleware_onion_mut()
        .add("poa", ExtraDataToPoaMiddleware)
        .unwrap();

    // 21000 + 100000 buffer
    let gas = manager
        .request_blocking("eth_sendTransaction", vec![json!({"to": "0x02"})])
        .unwrap();
    assert_eq!(gas, json!("0x1d8a8"));

    let block = manager
        .request_blocking("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
        .unwrap();
    assert_eq!(block["proofOfAuthorityData"], json!("0xd883010d"));
    assert!(block.get("extraData").is_none());
}

#[test]
fn test_stale_chain_blocks_requests() {
    let mock = Arc::new(MockTransport::new());
    mock.set_result("eth_getBlockByNumber", json!({"number": "0x1", "timestamp": "0x1"}));
    mock.set_result("eth_getBalance", json!("0x0"));

    let mut manager = RequestManager::new(Arc::clone(&mock));
    manager
        .middleware_onion_mut()
        .add(
            "stalecheck",
            StaleCheckMiddleware::new(Duration::from_secs(60)).unwrap(),
        )
        .unwrap();

    assert!(matches!(
        manager.request_blocking("eth_getBalance", vec![json!("0x01"), json!("latest")]),
        Err(RpcError::StaleBlockchain { .. })
    ));
    assert_eq!(mock.call_count("eth_getBalance"), 0);

    // Block lookups themselves are exempt
    manager
        .request_blocking("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
        .unwrap();
}

#[test]
fn test_from_config_builds_full_stack() {
    let mock = Arc::new(MockTransport::new());
    mock.set_result("eth_chainId", json!("0x1"));
    mock.fail_transport("eth_chainId", 1);

    let config: ClientConfig = serde_json::from_value(json!({
        "cache_enabled": true,
        "cache_capacity": 8,
        "retry": { "retries": 2, "backoff_ms": 1 }
    }))
    .unwrap();
    let manager = RequestManager::<RetryingTransport<Arc<MockTransport>>>::from_config(
        Arc::clone(&mock),
        &config,
    )
    .unwrap();

    assert_eq!(manager.request_blocking("eth_chainId", vec![]).unwrap(), json!("0x1"));
    assert_eq!(manager.request_blocking("eth_chainId", vec![]).unwrap(), json!("0x1"));

    // One failed attempt, one success, then a cache hit
    assert_eq!(mock.call_count("eth_chainId"), 2);
    assert_eq!(manager.request_cache().unwrap().capacity(), Some(8));
}

#[tokio::test]
async fn test_async_chain_ordering_and_batch() {
    let log: Log = Arc::default();
    let mock = echo_transport();
    let mut manager = AsyncRequestManager::with_cache(
        Arc::clone(&mock),
        Arc::new(SimpleCache::new()),
        None,
    );
    manager.middleware_onion_mut().add("a", tagging("a", &log)).unwrap();
    manager.middleware_onion_mut().add("b", tagging("b", &log)).unwrap();

    assert_eq!(manager.coro_request("echo", vec![]).await.unwrap(), json!("abba"));

    let mut batch = manager.batch().unwrap();
    batch.add("echo", vec![json!("x")]).add("missing", vec![]);
    assert!(matches!(manager.batch(), Err(RpcError::BatchInProgress)));
    let results = batch.execute().await.unwrap();
    assert_eq!(results[0].as_ref().unwrap(), &json!("xabba"));
    assert!(matches!(results[1], Err(RpcError::Rpc { code: Some(-32601), .. })));
}

#[tokio::test]
async fn test_async_from_config_with_stale_check() {
    let mock = Arc::new(MockTransport::new());
    mock.set_result("eth_getBlockByNumber", json!({"number": "0x1", "timestamp": "0x0"}));

    let config = ClientConfig {
        stale_check_delay_secs: Some(30),
        ..ClientConfig::default()
    };
    let manager = AsyncRequestManager::<RetryingTransport<Arc<MockTransport>>>::from_config(
        Arc::clone(&mock),
        &config,
    )
    .unwrap();

    let err = manager.coro_request("eth_call", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::StaleBlockchain { allowable_delay, .. } if allowable_delay == Duration::from_secs(30)));
}
