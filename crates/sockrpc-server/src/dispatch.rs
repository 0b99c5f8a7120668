//! Request dispatch.
//!
//! Resolves a decoded [`Request`] against the [`MethodRegistry`], runs the
//! handler on the blocking pool under its deadline and folds every outcome
//! into a [`Response`]. Nothing a handler does escapes this module.
//!
//! A handler holds one of the dispatcher's handler slots until it returns,
//! even when its caller has already been answered with a timeout. A stuck
//! handler therefore occupies a slot instead of piling up blocking threads.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use sockrpc_protocol::{Params, Request, Response};

use crate::registry::{HandlerError, Method, MethodRegistry};

/// Why a dispatch produced an error response.
///
/// The `Display` text is what the caller sees in the `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No method is registered under the requested name.
    #[error("method {method} not found on rpc server")]
    MethodNotFound { method: String },

    /// The handler reported a failure.
    #[error("{source}")]
    Handler {
        method: String,
        #[source]
        source: HandlerError,
    },

    /// The handler did not finish before its deadline.
    #[error("method {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The handler panicked.
    #[error("method {method} panicked")]
    Panicked { method: String },
}

impl DispatchError {
    /// Creates a method-not-found error.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }
}

/// Routes requests to registered handlers.
///
/// Owns the registry for its whole lifetime and exposes no way to mutate it,
/// so it can be shared across connections behind an `Arc` without locking.
#[derive(Debug)]
pub struct Dispatcher {
    registry: MethodRegistry,
    default_timeout: Option<Duration>,
    handler_slots: Arc<Semaphore>,
}

impl Dispatcher {
    /// Creates a dispatcher with no limit on concurrently running handlers.
    ///
    /// `default_timeout` applies to methods registered without their own.
    pub fn new(registry: MethodRegistry, default_timeout: Option<Duration>) -> Self {
        Self::with_handler_limit(registry, default_timeout, Semaphore::MAX_PERMITS)
    }

    /// Creates a dispatcher running at most `limit` handlers at once.
    ///
    /// Waiting for a slot counts against the request's deadline.
    pub fn with_handler_limit(
        registry: MethodRegistry,
        default_timeout: Option<Duration>,
        limit: usize,
    ) -> Self {
        Self {
            registry,
            default_timeout,
            handler_slots: Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS))),
        }
    }

    /// Returns the number of handler slots not held by a running handler.
    pub fn idle_handler_slots(&self) -> usize {
        self.handler_slots.available_permits()
    }

    /// Returns the registry being served.
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Returns the deadline that applies to `method`.
    pub fn effective_timeout(&self, method: &Method) -> Option<Duration> {
        method.timeout().or(self.default_timeout)
    }

    /// Dispatches a request and builds the response.
    #[tracing::instrument(skip_all, fields(method = %request.method, id = %request.id))]
    pub async fn dispatch(&self, request: Request) -> Response {
        let Request { method, id, params } = request;

        match self.invoke(&method, params).await {
            Ok(result) => {
                debug!("Handler succeeded");
                Response::success(id, result)
            }
            Err(e) => {
                warn!(error = %e, "Dispatch failed");
                Response::error(id, e.to_string())
            }
        }
    }

    /// Invokes `method` with `params` and returns its value.
    pub async fn invoke(
        &self,
        method: &str,
        params: Option<Params>,
    ) -> Result<Value, DispatchError> {
        let entry = self
            .registry
            .get(method)
            .ok_or_else(|| DispatchError::method_not_found(method))?;

        let handler = entry.handler();
        let params = params.unwrap_or_default();
        let slots = Arc::clone(&self.handler_slots);
        let run = async move {
            // The semaphore is never closed, so this only ever waits.
            let slot = slots.acquire_owned().await.ok();
            tokio::task::spawn_blocking(move || {
                let _slot = slot;
                handler.call(params)
            })
            .await
        };

        let joined = match self.effective_timeout(entry) {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(joined) => joined,
                // An abandoned handler keeps its thread and its slot until it
                // returns; only the connection is released.
                Err(_) => {
                    return Err(DispatchError::Timeout {
                        method: method.to_string(),
                        timeout,
                    });
                }
            },
            None => run.await,
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(DispatchError::Handler {
                method: method.to_string(),
                source,
            }),
            Err(e) => {
                debug!(error = %e, "Handler task failed");
                Err(DispatchError::Panicked {
                    method: method.to_string(),
                })
            }
        }
    }
}
