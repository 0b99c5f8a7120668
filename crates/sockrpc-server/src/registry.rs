//! Method registry.
//!
//! The registry is filled once during setup and then moved into a
//! [`Dispatcher`](crate::Dispatcher), which only ever reads it. Nothing can
//! register a method while a server is serving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use sockrpc_protocol::Params;

/// Result returned by a handler.
pub type HandlerResult = Result<Value, HandlerError>;

/// Failure raised by application handler code.
///
/// The message is sent back verbatim as the response `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A callable method body.
///
/// Handlers receive the request's keyed params (empty when none were sent)
/// and run on a blocking thread, so they may do blocking work.
pub trait Handler: Send + Sync + 'static {
    /// Invokes the handler.
    fn call(&self, params: Params) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(Params) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, params: Params) -> HandlerResult {
        self(params)
    }
}

/// A registered method.
#[derive(Clone)]
pub struct Method {
    name: String,
    handler: Arc<dyn Handler>,
    timeout: Option<Duration>,
}

impl Method {
    /// Creates a method entry.
    pub fn new(name: impl Into<String>, handler: impl Handler, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            timeout,
        }
    }

    /// Returns the method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the per-method deadline, if one was registered.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns a shared handle to the handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Mapping from method name to [`Method`].
#[derive(Debug, Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure under `name`, replacing any previous entry.
    ///
    /// `timeout` overrides the server's default request timeout for this
    /// method.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        handler: F,
        timeout: Option<Duration>,
    ) -> &mut Self
    where
        F: Fn(Params) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(name, handler, timeout)
    }

    /// Registers any [`Handler`] implementation under `name`.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl Handler,
        timeout: Option<Duration>,
    ) -> &mut Self {
        let method = Method::new(name, handler, timeout);
        if self.methods.contains_key(method.name()) {
            debug!(method = %method.name(), "Replacing registered method");
        } else {
            debug!(method = %method.name(), ?timeout, "Registered method");
        }
        self.methods.insert(method.name.clone(), method);
        self
    }

    /// Registers a handler taking typed arguments.
    ///
    /// The keyed params are deserialized into `P` and the return value is
    /// serialized back into a [`Value`]. A params set that does not fit `P`
    /// fails the call with the deserializer's message.
    pub fn register_typed<P, R, F>(
        &mut self,
        name: impl Into<String>,
        handler: F,
        timeout: Option<Duration>,
    ) -> &mut Self
    where
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.register(
            name,
            move |params: Params| -> HandlerResult {
                let args: P = serde_json::from_value(Value::Object(params))?;
                let result = handler(args)?;
                Ok(serde_json::to_value(result)?)
            },
            timeout,
        )
    }

    /// Looks up a method by name.
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Returns the number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
