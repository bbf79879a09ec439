//! The single dispatch implementation shared by every transport.

use super::{parse_message, validate_envelope, Message, Outgoing, Request, Response, RpcError};
use crate::Result;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The business logic behind the gateway.
///
/// Given one validated envelope, produce a response, an error, or nothing.
/// The dispatcher stamps the request id onto whatever comes back, so an
/// implementation does not have to echo it itself.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Result<Option<Response>>;
}

/// Per-envelope admission check, consulted before the handler runs.
///
/// Returns the decline reason on rejection.
pub trait EnvelopeGuard: Send + Sync + 'static {
    fn admit(&self, request: &Request) -> std::result::Result<(), String>;
}

/// Adapter turning a closure into a [`RequestHandler`].
pub struct HandlerFn<F>(F);

/// Wrap `f` as a [`RequestHandler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> BoxFuture<'static, Result<Option<Response>>> + Send + Sync + 'static,
{
    HandlerFn(f)
}

#[async_trait::async_trait]
impl<F> RequestHandler for HandlerFn<F>
where
    F: Fn(Request) -> BoxFuture<'static, Result<Option<Response>>> + Send + Sync + 'static,
{
    async fn handle(&self, request: Request) -> Result<Option<Response>> {
        (self.0)(request).await
    }
}

/// Applies batch and notification rules and isolates handler faults.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn RequestHandler>,
    guard: Option<Arc<dyn EnvelopeGuard>>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler,
            guard: None,
        }
    }

    /// Consult `guard` for every envelope before it reaches the handler.
    pub fn with_guard(mut self, guard: Arc<dyn EnvelopeGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Parse and dispatch one frame. Malformed JSON yields a single parse
    /// error with `id: null`.
    pub async fn dispatch_bytes(&self, bytes: &[u8]) -> Option<Outgoing> {
        match parse_message(bytes) {
            Ok(message) => self.dispatch_message(message).await,
            Err(e) => {
                warn!("Rejecting malformed frame: {}", e.message);
                Some(Outgoing::Single(Response::error(Value::Null, e)))
            }
        }
    }

    /// Dispatch a single value or a batch.
    ///
    /// Returns `None` when there is nothing to send: a notification, a batch
    /// made only of notifications, or an empty batch.
    pub async fn dispatch_message(&self, message: Message) -> Option<Outgoing> {
        match message {
            Message::Single(value) => self.dispatch_value(value).await.map(Outgoing::Single),
            Message::Batch(items) => {
                debug!("Dispatching batch of {}", items.len());
                let responses: Vec<Response> =
                    join_all(items.into_iter().map(|item| self.dispatch_value(item)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(Outgoing::Batch(responses))
                }
            }
        }
    }

    /// Validate and dispatch one value.
    pub async fn dispatch_value(&self, value: Value) -> Option<Response> {
        match validate_envelope(value) {
            Ok(request) => self.dispatch_request(request).await,
            Err(response) => {
                warn!("Invalid envelope: {:?}", response.error.as_ref().map(|e| &e.message));
                Some(response)
            }
        }
    }

    /// Dispatch one validated envelope.
    ///
    /// A handler `Err` or panic becomes an error response for this envelope
    /// only. Every non-notification gets exactly one response carrying its
    /// own id; a notification never gets one.
    pub async fn dispatch_request(&self, request: Request) -> Option<Response> {
        let id = request.id.clone();
        let method = request.method.clone();

        if let Some(guard) = &self.guard {
            if let Err(reason) = guard.admit(&request) {
                warn!("Declined {}: {}", method, reason);
                return id.map(|id| Response::error(id, RpcError::unauthorized(reason)));
            }
        }

        debug!("RPC call: {}", method);

        let outcome = AssertUnwindSafe(self.handler.handle(request))
            .catch_unwind()
            .await;

        let Some(id) = id else {
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Notification {} failed: {}", method, e),
                Err(panic) => error!("Notification {} panicked: {}", method, panic_message(&*panic)),
            }
            return None;
        };

        let response = match outcome {
            Ok(Ok(Some(mut response))) if response.is_well_formed() => {
                response.id = id;
                response
            }
            Ok(Ok(Some(_))) => {
                error!("Handler produced a malformed response for {}", method);
                Response::error(
                    id,
                    RpcError::internal("Handler response must carry exactly one of result or error"),
                )
            }
            Ok(Ok(None)) => {
                error!("Handler produced no response for {}", method);
                Response::error(id, RpcError::internal("Handler produced no response"))
            }
            Ok(Err(e)) => {
                error!("RPC error for {}: {}", method, e);
                Response::error(id, RpcError::new(e.to_rpc_error_code(), e.to_string()))
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("Handler panicked for {}: {}", method, message);
                Response::error(id, RpcError::internal(format!("Internal error: {}", message)))
            }
        };

        Some(response)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
