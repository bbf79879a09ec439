//! Cross-origin middleware.
//!
//! Preflight requests to any path short-circuit with 204. In restricted mode
//! an unlisted request origin gets the first allowed origin back.
//! `tower_http::cors::CorsLayer` does not answer every `OPTIONS` with 204.

use crate::config::CorsPolicy;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ORIGIN, VARY,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Resolved origin policy for a bound server.
#[derive(Debug, Clone)]
pub(crate) enum AllowedOrigins {
    Any,
    /// First entry is the fallback when the request origin is not listed.
    List(Arc<Vec<HeaderValue>>),
}

impl AllowedOrigins {
    pub(crate) fn resolve(policy: &CorsPolicy, host: &str, addr: SocketAddr) -> Self {
        let port = addr.port();
        let origins: Vec<String> = match policy {
            CorsPolicy::Any => return AllowedOrigins::Any,
            CorsPolicy::Origins(list) => list.clone(),
            CorsPolicy::LocalOrigin => {
                let mut origins = vec![format!("http://{}:{}", host, port)];
                if addr.ip().is_loopback() {
                    for alias in ["localhost", "127.0.0.1"] {
                        let origin = format!("http://{}:{}", alias, port);
                        if !origins.contains(&origin) {
                            origins.push(origin);
                        }
                    }
                }
                origins
            }
        };

        AllowedOrigins::List(Arc::new(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect(),
        ))
    }

    fn allow_origin(&self, request_origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match self {
            AllowedOrigins::Any => Some(HeaderValue::from_static("*")),
            AllowedOrigins::List(list) => request_origin
                .and_then(|origin| list.iter().find(|allowed| *allowed == origin))
                .or_else(|| list.first())
                .cloned(),
        }
    }
}

pub(crate) async fn cors_middleware(
    State(origins): State<AllowedOrigins>,
    request: Request,
    next: Next,
) -> Response {
    let request_origin = request.headers().get(ORIGIN).cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = origins.allow_origin(request_origin.as_ref()) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    if matches!(origins, AllowedOrigins::List(_)) {
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }

    response
}
