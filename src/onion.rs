//! Middleware onion
//!
//! Ordered, named stack of middlewares wrapped around a transport call.
//! Layer 0 is the outermost: its request hook runs first and its response
//! hook runs last.

use crate::error::{Result, RpcError};
use crate::middleware::Middleware;
use crate::transport::{AsyncTransport, Transport};
use crate::types::{Params, RpcResponse};
use std::fmt;
use tracing::debug;

struct Layer {
    name: String,
    middleware: Box<dyn Middleware>,
}

/// Ordered collection of named middlewares.
#[derive(Default)]
pub struct MiddlewareOnion {
    layers: Vec<Layer>,
}

impl MiddlewareOnion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `middleware` as the innermost layer.
    pub fn add<M>(&mut self, name: impl Into<String>, middleware: M) -> Result<()>
    where
        M: Middleware + 'static,
    {
        let layer = self.new_layer(name.into(), Box::new(middleware))?;
        self.layers.push(layer);
        Ok(())
    }

    /// Insert `middleware` at `layer`, 0 being the outermost.
    ///
    /// A `layer` past the end appends.
    pub fn inject<M>(&mut self, name: impl Into<String>, middleware: M, layer: usize) -> Result<()>
    where
        M: Middleware + 'static,
    {
        let new_layer = self.new_layer(name.into(), Box::new(middleware))?;
        let index = layer.min(self.layers.len());
        self.layers.insert(index, new_layer);
        Ok(())
    }

    /// Swap the middleware registered as `name`, keeping its position.
    pub fn replace<M>(&mut self, name: &str, middleware: M) -> Result<()>
    where
        M: Middleware + 'static,
    {
        let index = self.position(name)?;
        self.layers[index].middleware = Box::new(middleware);
        Ok(())
    }

    /// Remove the middleware registered as `name`.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let index = self.position(name)?;
        self.layers.remove(index);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Middleware registered as `name`.
    pub fn get(&self, name: &str) -> Option<&dyn Middleware> {
        self.layers
            .iter()
            .find(|layer| layer.name == name)
            .map(|layer| layer.middleware.as_ref())
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn new_layer(&self, name: String, middleware: Box<dyn Middleware>) -> Result<Layer> {
        if self.layers.iter().any(|layer| layer.name == name) {
            return Err(RpcError::DuplicateMiddleware(name));
        }
        Ok(Layer { name, middleware })
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.layers
            .iter()
            .position(|layer| layer.name == name)
            .ok_or_else(|| RpcError::UnknownMiddleware(name.to_string()))
    }

    /// Run a single call through every layer and the transport.
    pub fn execute(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Params,
    ) -> Result<RpcResponse> {
        let mut params = params;
        for layer in &self.layers {
            params = layer.middleware.process_request(transport, method, params)?;
        }

        debug!("Sending {} through transport", method);
        let mut response = transport.make_request(method, params)?;

        for layer in self.layers.iter().rev() {
            response = layer.middleware.process_response(transport, method, response)?;
        }
        Ok(response)
    }

    /// Async counterpart of [`MiddlewareOnion::execute`].
    pub async fn async_execute(
        &self,
        transport: &dyn AsyncTransport,
        method: &str,
        params: Params,
    ) -> Result<RpcResponse> {
        let mut params = params;
        for layer in &self.layers {
            params = layer
                .middleware
                .async_process_request(transport, method, params)
                .await?;
        }

        debug!("Sending {} through transport", method);
        let mut response = transport.make_request(method, params).await?;

        for layer in self.layers.iter().rev() {
            response = layer
                .middleware
                .async_process_response(transport, method, response)
                .await?;
        }
        Ok(response)
    }

    /// Run a batch through the layers element by element around one
    /// transport batch call.
    ///
    /// Responses come back in request order.
    pub fn execute_batch(
        &self,
        transport: &dyn Transport,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        let mut processed = Vec::with_capacity(requests.len());
        for (method, mut params) in requests {
            for layer in &self.layers {
                params = layer.middleware.process_request(transport, &method, params)?;
            }
            processed.push((method, params));
        }

        let methods: Vec<String> = processed.iter().map(|(m, _)| m.clone()).collect();
        debug!("Sending batch of {} through transport", methods.len());
        let responses = transport.make_batch_request(processed)?;
        check_batch_len(methods.len(), responses.len())?;

        methods
            .iter()
            .zip(responses)
            .map(|(method, mut response)| {
                for layer in self.layers.iter().rev() {
                    response = layer.middleware.process_response(transport, method, response)?;
                }
                Ok(response)
            })
            .collect()
    }

    /// Async counterpart of [`MiddlewareOnion::execute_batch`].
    pub async fn async_execute_batch(
        &self,
        transport: &dyn AsyncTransport,
        requests: Vec<(String, Params)>,
    ) -> Result<Vec<RpcResponse>> {
        let mut processed = Vec::with_capacity(requests.len());
        for (method, mut params) in requests {
            for layer in &self.layers {
                params = layer
                    .middleware
                    .async_process_request(transport, &method, params)
                    .await?;
            }
            processed.push((method, params));
        }

        let methods: Vec<String> = processed.iter().map(|(m, _)| m.clone()).collect();
        debug!("Sending batch of {} through transport", methods.len());
        let responses = transport.make_batch_request(processed).await?;
        check_batch_len(methods.len(), responses.len())?;

        let mut out = Vec::with_capacity(responses.len());
        for (method, mut response) in methods.iter().zip(responses) {
            for layer in self.layers.iter().rev() {
                response = layer
                    .middleware
                    .async_process_response(transport, method, response)
                    .await?;
            }
            out.push(response);
        }
        Ok(out)
    }
}

fn check_batch_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(RpcError::InvalidResponse(format!(
            "batch returned {} responses for {} requests",
            got, expected
        )));
    }
    Ok(())
}

impl fmt::Debug for MiddlewareOnion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareOnion")
            .field("layers", &self.names())
            .finish()
    }
}
