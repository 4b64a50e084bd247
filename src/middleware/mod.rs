//! Middleware trait and built-in middlewares
//!
//! A middleware sees every request on its way to the transport and every
//! response on its way back. Each hook has a blocking and an async variant;
//! all four default to passing data through unchanged, so a middleware only
//! overrides what it needs.
//!
//! Hooks receive the terminal transport for side calls (e.g. fetching the
//! latest block). Side calls made this way skip the rest of the chain.

mod buffered_gas;
mod gas_price;
mod geth_poa;
mod stalecheck;

pub use buffered_gas::{BufferedGasEstimateMiddleware, GAS_BUFFER};
pub use gas_price::{GasPriceStrategy, GasPriceStrategyMiddleware};
pub use geth_poa::ExtraDataToPoaMiddleware;
pub use stalecheck::{StaleCheckMiddleware, SKIP_STALECHECK_FOR_METHODS};

use crate::error::Result;
use crate::transport::{AsyncTransport, Transport};
use crate::types::{Params, RpcResponse};
use async_trait::async_trait;

/// Request/response processing stage of the onion.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Transform params before the call (blocking mode).
    fn process_request(
        &self,
        _transport: &dyn Transport,
        _method: &str,
        params: Params,
    ) -> Result<Params> {
        Ok(params)
    }

    /// Transform the response after the call (blocking mode).
    fn process_response(
        &self,
        _transport: &dyn Transport,
        _method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        Ok(response)
    }

    /// Transform params before the call (async mode).
    async fn async_process_request(
        &self,
        _transport: &dyn AsyncTransport,
        _method: &str,
        params: Params,
    ) -> Result<Params> {
        Ok(params)
    }

    /// Transform the response after the call (async mode).
    async fn async_process_response(
        &self,
        _transport: &dyn AsyncTransport,
        _method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        Ok(response)
    }
}

type RequestFn = Box<dyn Fn(&str, Params) -> Result<Params> + Send + Sync>;
type ResponseFn = Box<dyn Fn(&str, RpcResponse) -> Result<RpcResponse> + Send + Sync>;

/// Middleware built from plain closures.
///
/// The closures never suspend, so the same pair serves blocking and async
/// execution.
///
/// ```
/// use rpc_onion::middleware::FnMiddleware;
///
/// let lowercase = FnMiddleware::new().on_request(|_method, params| {
///     Ok(params
///         .into_iter()
///         .map(|p| match p.as_str() {
///             Some(s) => s.to_lowercase().into(),
///             None => p,
///         })
///         .collect())
/// });
/// # let _ = lowercase;
/// ```
#[derive(Default)]
pub struct FnMiddleware {
    request: Option<RequestFn>,
    response: Option<ResponseFn>,
}

impl FnMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request hook.
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Params) -> Result<Params> + Send + Sync + 'static,
    {
        self.request = Some(Box::new(f));
        self
    }

    /// Set the response hook.
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, RpcResponse) -> Result<RpcResponse> + Send + Sync + 'static,
    {
        self.response = Some(Box::new(f));
        self
    }

    fn request(&self, method: &str, params: Params) -> Result<Params> {
        match &self.request {
            Some(f) => f(method, params),
            None => Ok(params),
        }
    }

    fn response(&self, method: &str, response: RpcResponse) -> Result<RpcResponse> {
        match &self.response {
            Some(f) => f(method, response),
            None => Ok(response),
        }
    }
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn process_request(&self, _: &dyn Transport, method: &str, params: Params) -> Result<Params> {
        self.request(method, params)
    }

    fn process_response(
        &self,
        _: &dyn Transport,
        method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        self.response(method, response)
    }

    async fn async_process_request(
        &self,
        _: &dyn AsyncTransport,
        method: &str,
        params: Params,
    ) -> Result<Params> {
        self.request(method, params)
    }

    async fn async_process_response(
        &self,
        _: &dyn AsyncTransport,
        method: &str,
        response: RpcResponse,
    ) -> Result<RpcResponse> {
        self.response(method, response)
    }
}

impl std::fmt::Debug for FnMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}
