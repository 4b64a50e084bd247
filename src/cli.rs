//! CLI implementation for rpcctl
//!
//! Sends JSON-RPC calls through a configured request manager, so caching,
//! retries and the stale check can be exercised against a live node.
//! All commands output pretty JSON.

use crate::config::{load_allow_list, load_config, ClientConfig};
use crate::http::{AsyncHttpTransport, HttpTransport};
use crate::manager::{AsyncRequestManager, RequestManager};
use crate::types::Params;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// JSON-RPC request CLI tool
#[derive(Parser, Debug)]
#[command(name = "rpcctl")]
#[command(about = "Send Ethereum JSON-RPC requests through a caching middleware stack")]
pub struct Cli {
    /// RPC endpoint URL
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Path to a client config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a cache allow-list file (one method per line)
    #[arg(short, long)]
    allow_list: Option<PathBuf>,

    /// Use the async transport and manager
    #[arg(long = "async")]
    use_async: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a single request
    Call {
        /// Method name, e.g. eth_getBlockByNumber
        method: String,
        /// Params as a JSON array
        #[arg(default_value = "[]")]
        params: String,
        /// Send the request this many times (repeats are served from cache when enabled)
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Send several requests as one batch
    Batch {
        /// Calls as METHOD or METHOD=PARAMS_JSON_ARRAY
        #[arg(required = true)]
        calls: Vec<String>,
    },
}

/// Parse a JSON array of params.
fn parse_params(s: &str) -> Result<Params> {
    let value: Value =
        serde_json::from_str(s).with_context(|| format!("Invalid params JSON: {}", s))?;
    match value {
        Value::Array(params) => Ok(params),
        other => anyhow::bail!("Params must be a JSON array, got: {}", other),
    }
}

/// Parse `METHOD` or `METHOD=PARAMS`.
fn parse_call(s: &str) -> Result<(String, Params)> {
    let (method, params) = match s.split_once('=') {
        Some((method, params)) => (method, parse_params(params)?),
        None => (s, Vec::new()),
    };
    if method.is_empty() {
        anyhow::bail!("Missing method name in call: {}", s);
    }
    Ok((method.to_string(), params))
}

fn batch_output(calls: &[(String, Params)], results: Vec<crate::error::Result<Value>>) -> Value {
    let items: Vec<Value> = calls
        .iter()
        .zip(results)
        .map(|((method, _), result)| match result {
            Ok(value) => json!({ "method": method, "result": value }),
            Err(e) => json!({ "method": method, "error": e.to_string() }),
        })
        .collect();
    Value::Array(items)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn client_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(path) = &cli.allow_list {
        config.cache_allow_list.extend(load_allow_list(path)?);
    }
    config.validate().context("Invalid client configuration")?;
    Ok(config)
}

fn run_blocking(cli: Cli, config: &ClientConfig) -> Result<Value> {
    let manager = RequestManager::from_config(HttpTransport::new(&cli.rpc_url), config)?;

    match cli.command {
        Commands::Call {
            method,
            params,
            repeat,
        } => {
            let params = parse_params(&params)?;
            let mut result = Value::Null;
            for _ in 0..repeat.max(1) {
                result = manager
                    .request_blocking(&method, params.clone())
                    .with_context(|| format!("{} failed", method))?;
            }
            let cache_entries = manager.request_cache().map(|cache| cache.len());
            Ok(json!({
                "method": method,
                "result": result,
                "requests": repeat.max(1),
                "cache_entries": cache_entries,
            }))
        }
        Commands::Batch { calls } => {
            let calls = calls
                .iter()
                .map(|call| parse_call(call))
                .collect::<Result<Vec<_>>>()?;
            let results = manager.make_batch_request(calls.clone())?;
            Ok(batch_output(&calls, results))
        }
    }
}

async fn run_async(cli: Cli, config: &ClientConfig) -> Result<Value> {
    let manager = AsyncRequestManager::from_config(AsyncHttpTransport::new(&cli.rpc_url), config)?;

    match cli.command {
        Commands::Call {
            method,
            params,
            repeat,
        } => {
            let params = parse_params(&params)?;
            let mut result = Value::Null;
            for _ in 0..repeat.max(1) {
                result = manager
                    .coro_request(&method, params.clone())
                    .await
                    .with_context(|| format!("{} failed", method))?;
            }
            let cache_entries = manager.request_cache().map(|cache| cache.len());
            Ok(json!({
                "method": method,
                "result": result,
                "requests": repeat.max(1),
                "cache_entries": cache_entries,
            }))
        }
        Commands::Batch { calls } => {
            let calls = calls
                .iter()
                .map(|call| parse_call(call))
                .collect::<Result<Vec<_>>>()?;
            let results = manager.make_batch_request(calls.clone()).await?;
            Ok(batch_output(&calls, results))
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = client_config(&cli)?;
    info!("RPC URL: {}", cli.rpc_url);

    let result = if cli.use_async {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        runtime.block_on(run_async(cli, &config))?
    } else {
        run_blocking(cli, &config)?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
