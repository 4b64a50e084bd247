//! rpcctl - JSON-RPC request CLI tool
//!
//! Sends Ethereum JSON-RPC calls through the middleware onion and request
//! cache, printing results as pretty JSON.

use rpc_onion::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
