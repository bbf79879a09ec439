//! MCP Gateway - JSON-RPC 2.0 gateway library.
//!
//! One dispatch core shared by two transports:
//!
//! - [`StreamTransport`] reads newline-delimited envelopes from a byte stream
//!   (stdin by default) and writes one response line per message.
//! - [`HttpTransport`] serves `POST /mcp`, a health probe and an SSE push
//!   stream for server-to-client events.
//!
//! Both consult an optional [`AuthGatekeeper`] (bearer tokens, registered
//! clients, PKCE authorization codes). The business logic lives behind a
//! [`RequestHandler`] supplied by the embedding application.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_gateway::{handler_fn, Dispatcher, HttpConfig, HttpTransport, Response};
//! use futures::FutureExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mcp_gateway::Result<()> {
//!     let handler = handler_fn(|req| {
//!         async move { Ok(Some(Response::success(serde_json::Value::Null, req.method.into()))) }.boxed()
//!     });
//!     let handle = HttpTransport::new(HttpConfig::default(), Dispatcher::new(Arc::new(handler)))
//!         .start()
//!         .await?;
//!
//!     handle.broadcast("task:completed", &serde_json::json!({"id": "t1"}))?;
//!
//!     // `wait` shuts the server down, so hold it open until ctrl-c
//!     tokio::signal::ctrl_c().await?;
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use auth::{
    AuthDecision, AuthFlowError, AuthGatekeeper, AuthState, AuthorizationRequest, EnableReason,
    IssuedToken, RegisteredClient,
};
pub use config::{AuthConfigFile, ConfigFailurePolicy, CorsPolicy, HttpConfig, StaticToken};
pub use error::{GatewayError, Result};
pub use protocol::{
    handler_fn, Dispatcher, EnvelopeGuard, Message, Outgoing, Request, RequestHandler, Response,
    RpcError,
};
pub use transport::{
    EventBroadcaster, HttpTransport, HttpTransportHandle, StreamTransport, StreamTransportHandle,
};
