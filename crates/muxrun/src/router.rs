//! Method dispatch.
//!
//! Handlers are async closures taking a `Call` and returning
//! `anyhow::Result<ServerValue>`. Errors become `Failure::Application` unless
//! they already are a `Failure`, in which case they pass through unchanged.
//! A panicking handler is reported as a failure instead of taking the server down.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use muxrpc::Failure;
use muxrpc::Plain;
use muxrpc::RpcResult;

use crate::observable::ServerValue;

/// One incoming request, as seen by a handler.
#[derive(Debug, Clone)]
pub struct Call {
    /// Reply address of the caller.
    pub client: String,
    pub method: String,
    pub args: Vec<Plain>,
}

impl Call {
    pub fn arg(&self, index: usize) -> Result<&Plain, Failure> {
        self.args
            .get(index)
            .ok_or_else(|| Failure::BadArguments(format!("{} expects an argument at position {}", self.method, index)))
    }

    pub fn str_arg(&self, index: usize) -> Result<&str, Failure> {
        self.arg(index)?
            .as_str()
            .ok_or_else(|| Failure::BadArguments(format!("{} expects a string at position {}", self.method, index)))
    }

    pub fn u64_arg(&self, index: usize) -> Result<u64, Failure> {
        self.arg(index)?
            .as_u64()
            .ok_or_else(|| Failure::BadArguments(format!("{} expects an integer at position {}", self.method, index)))
    }
}

type Handler = Arc<dyn Fn(Call) -> BoxFuture<'static, anyhow::Result<ServerValue>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn route<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ServerValue>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |call| handler(call).boxed());
        self.routes.insert(name.to_string(), handler);
        self
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Runs the handler for `call.method`.
    pub async fn dispatch(&self, call: Call) -> RpcResult<ServerValue> {
        let Some(handler) = self.routes.get(&call.method).cloned() else {
            return Err(Failure::MethodNotFound(call.method));
        };
        let method = call.method.clone();

        // The handler is invoked inside the guarded future so a panic before its first await is caught too.
        let guarded = AssertUnwindSafe(async move { handler(call).await }).catch_unwind();
        match guarded.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(into_failure(e)),
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("{} panicked: {}", method, s)
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("{} panicked: {}", method, s)
                } else {
                    format!("{} panicked", method)
                };
                tracing::warn!(method = %method, "handler panicked");
                Err(Failure::Application(message))
            }
        }
    }
}

fn into_failure(e: anyhow::Error) -> Failure {
    match e.downcast::<Failure>() {
        Ok(failure) => failure,
        Err(e) => Failure::Application(format!("{:#}", e)),
    }
}
