//! Built-in request handler.
//!
//! Answers the liveness and introspection methods every gateway exposes.
//! Real deployments put their business logic behind their own
//! [`RequestHandler`].

use mcp_gateway::{GatewayError, Request, RequestHandler, Response};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

pub struct BuiltinHandler {
    started: Instant,
}

impl BuiltinHandler {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for BuiltinHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RequestHandler for BuiltinHandler {
    async fn handle(&self, request: Request) -> mcp_gateway::Result<Option<Response>> {
        if request.is_notification() {
            debug!("Notification: {}", request.method);
            return Ok(None);
        }

        let result = match request.method.as_str() {
            "ping" => json!("pong"),
            "health_check" => json!({"status": "ok"}),
            "server/info" => json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "uptimeSecs": self.started.elapsed().as_secs(),
            }),
            other => {
                return Err(GatewayError::MethodNotFound {
                    method: other.to_string(),
                })
            }
        };

        Ok(Some(Response::success(Value::Null, result)))
    }
}
