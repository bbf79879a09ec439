//! HTTP + SSE transport using Axum.
//!
//! Routes:
//! - `POST /mcp` takes one envelope or a batch
//! - `GET /mcp/health` is the liveness probe
//! - `GET /mcp/events` is the SSE push stream
//!
//! Anything else gets a 404 envelope. `OPTIONS` on any path is a CORS
//! preflight and answers 204.

mod cors;
mod events;
mod handlers;

pub use events::{EventBroadcaster, PushEvent, Subscription};

use crate::auth::AuthGatekeeper;
use crate::config::{HttpConfig, HttpDefaults};
use crate::protocol::Dispatcher;
use crate::{GatewayError, Result};
use axum::routing::{get, post};
use axum::{middleware, Router};
use cors::AllowedOrigins;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared across handlers.
pub(crate) struct AppState {
    pub dispatcher: Dispatcher,
    pub auth: Option<Arc<AuthGatekeeper>>,
    pub events: EventBroadcaster,
    pub max_body_bytes: usize,
}

/// Handle to a running HTTP transport. Dropping it shuts the server down.
pub struct HttpTransportHandle {
    addr: SocketAddr,
    events: EventBroadcaster,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpTransportHandle {
    /// The address actually bound (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The broadcaster behind `/mcp/events`.
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Push a named event to every SSE subscriber.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<usize> {
        self.events.broadcast(event, payload)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Stop accepting connections and end every SSE stream.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.events.close_all();
        }
    }

    /// Shut down and wait for in-flight requests to finish.
    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("HTTP transport task failed: {}", e);
            }
        }
    }
}

impl Drop for HttpTransportHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// HTTP transport builder.
pub struct HttpTransport {
    config: HttpConfig,
    dispatcher: Dispatcher,
    auth: Option<Arc<AuthGatekeeper>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            auth: None,
        }
    }

    /// Check `Authorization` headers against `auth`.
    pub fn with_auth(mut self, auth: Arc<AuthGatekeeper>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Bind and start serving in a background task.
    pub async fn start(self) -> Result<HttpTransportHandle> {
        let listener = bind(&self.config).await?;
        let addr = listener.local_addr()?;
        let events = EventBroadcaster::new();

        let state = Arc::new(AppState {
            dispatcher: self.dispatcher,
            auth: self.auth,
            events: events.clone(),
            max_body_bytes: self.config.max_body_bytes,
        });
        let origins = AllowedOrigins::resolve(&self.config.cors, &self.config.host, addr);
        let app = router(state, origins);

        info!("HTTP transport listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("HTTP transport error: {}", e);
            }
            info!("HTTP transport stopped");
        });

        Ok(HttpTransportHandle {
            addr,
            events,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

fn router(state: Arc<AppState>, origins: AllowedOrigins) -> Router {
    Router::new()
        .route(
            HttpDefaults::RPC_PATH,
            post(handlers::handle_rpc).fallback(handlers::handle_not_found),
        )
        .route(
            HttpDefaults::HEALTH_PATH,
            get(handlers::handle_health).fallback(handlers::handle_not_found),
        )
        .route(
            HttpDefaults::EVENTS_PATH,
            get(handlers::handle_events).fallback(handlers::handle_not_found),
        )
        .fallback(handlers::handle_not_found)
        .layer(middleware::from_fn_with_state(origins, cors::cors_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve and bind `host:port`, refusing non-loopback interfaces unless
/// `allow_remote` is set.
async fn bind(config: &HttpConfig) -> Result<TcpListener> {
    let target = format!("{}:{}", config.host, config.port);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| GatewayError::Bind {
            addr: target.clone(),
            message: e.to_string(),
        })?
        .collect();

    let Some(&addr) = addrs.first() else {
        return Err(GatewayError::Bind {
            addr: target,
            message: "host resolved to no addresses".to_string(),
        });
    };

    if !config.allow_remote && !addrs.iter().all(|a| a.ip().is_loopback()) {
        return Err(GatewayError::config(format!(
            "refusing to bind non-loopback address {} without allow_remote",
            target
        )));
    }

    TcpListener::bind(addr).await.map_err(|e| GatewayError::Bind {
        addr: addr.to_string(),
        message: e.to_string(),
    })
}
