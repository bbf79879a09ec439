//! Integration tests for the HTTP + SSE transport.
//!
//! Each test binds a server on `127.0.0.1:0` and talks to it with reqwest.

use futures::{FutureExt, StreamExt};
use mcp_gateway::{
    handler_fn, AuthGatekeeper, Dispatcher, EnableReason, GatewayError, HttpConfig,
    HttpTransport, HttpTransportHandle, Request, Response,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
    Dispatcher::new(Arc::new(handler_fn(move |req: Request| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            match req.method.as_str() {
                "ping" => Ok(Some(Response::success(json!(1), json!("pong")))),
                "fail" => Err(GatewayError::handler("boom")),
                "notify" => Ok(None),
                other => Err(GatewayError::MethodNotFound {
                    method: other.to_string(),
                }),
            }
        }
        .boxed()
    })))
}

struct TestServer {
    handle: HttpTransportHandle,
    calls: Arc<AtomicUsize>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(config: HttpConfig, auth: Option<Arc<AuthGatekeeper>>) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transport = HttpTransport::new(config, dispatcher(calls.clone()));
        if let Some(auth) = auth {
            transport = transport.with_auth(auth);
        }
        let handle = transport.start().await.expect("server should start");
        Self {
            handle,
            calls,
            client: reqwest::Client::new(),
        }
    }

    async fn default() -> Self {
        Self::start(
            HttpConfig {
                port: 0,
                ..HttpConfig::default()
            },
            None,
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.handle.addr(), path)
    }

    async fn post(&self, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.client
            .post(self.url("/mcp"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("request should complete")
    }
}

#[tokio::test]
async fn test_ping_returns_identical_body() {
    let server = TestServer::default().await;

    let response = server.post(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"jsonrpc":"2.0","result":"pong","id":1}"#
    );
}

#[tokio::test]
async fn test_body_one_byte_over_limit_is_rejected() {
    let max = 256;
    let server = TestServer::start(
        HttpConfig {
            port: 0,
            max_body_bytes: max,
            ..HttpConfig::default()
        },
        None,
    )
    .await;

    let prefix = r#"{"jsonrpc":"2.0","method":"ping","id":1,"pad":""#;
    let suffix = r#""}"#;
    let padding = "x".repeat(max + 1 - prefix.len() - suffix.len());
    let body = format!("{}{}{}", prefix, padding, suffix);
    assert_eq!(body.len(), max + 1);

    let response = server.post(body).await;
    assert_eq!(response.status(), 413);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["error"]["code"], -32700);
    assert_eq!(value["error"]["message"], "Request body too large");
    assert_eq!(value["id"], Value::Null);
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_streamed_body_over_limit_is_rejected() {
    let max = 64;
    let server = TestServer::start(
        HttpConfig {
            port: 0,
            max_body_bytes: max,
            ..HttpConfig::default()
        },
        None,
    )
    .await;

    // No Content-Length: the cap has to be enforced while reading.
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        (0..4).map(|_| Ok(vec![b' '; max / 2])).collect();
    let body = reqwest::Body::wrap_stream(futures::stream::iter(chunks));

    let response = server.post(body).await;
    assert_eq!(response.status(), 413);
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_json_is_parse_error() {
    let server = TestServer::default().await;

    let response = server
        .post(r#"[{"jsonrpc":"2.0","method":"ping","id":1},"#)
        .await;
    assert_eq!(response.status(), 400);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["error"]["code"], -32700);
    assert_eq!(value["id"], Value::Null);
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_skips_notifications() {
    let server = TestServer::default().await;

    let response = server
        .post(
            r#"[
                {"jsonrpc":"2.0","method":"ping","id":"a"},
                {"jsonrpc":"2.0","method":"notify"},
                {"jsonrpc":"2.0","method":"fail","id":"b"}
            ]"#,
        )
        .await;
    assert_eq!(response.status(), 200);

    let value: Value = response.json().await.unwrap();
    let responses = value.as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], "a");
    assert_eq!(responses[0]["result"], "pong");
    assert_eq!(responses[1]["id"], "b");
    assert_eq!(responses[1]["error"]["code"], -32603);
}

#[tokio::test]
async fn test_notification_only_returns_no_content() {
    let server = TestServer::default().await;

    let response = server.post(r#"{"jsonrpc":"2.0","method":"notify"}"#).await;
    assert_eq!(response.status(), 204);
    assert!(response.bytes().await.unwrap().is_empty());

    let response = server
        .post(r#"[{"jsonrpc":"2.0","method":"notify","id":null}]"#)
        .await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_handler_fault_is_500_envelope() {
    let server = TestServer::default().await;

    let response = server.post(r#"{"jsonrpc":"2.0","method":"fail","id":9}"#).await;
    assert_eq!(response.status(), 500);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["id"], 9);
    assert_eq!(value["error"]["code"], -32603);
}

#[tokio::test]
async fn test_unknown_method_is_200_with_error() {
    let server = TestServer::default().await;

    let response = server.post(r#"{"jsonrpc":"2.0","method":"nope","id":2}"#).await;
    assert_eq!(response.status(), 200);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["error"]["code"], -32601);
}

#[tokio::test]
async fn test_unknown_path_is_404_envelope() {
    let server = TestServer::default().await;

    let response = server.client.get(server.url("/nowhere")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["error"]["code"], -32600);
    assert_eq!(value["id"], Value::Null);
}

#[tokio::test]
async fn test_options_preflight() {
    let server = TestServer::default().await;

    let response = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/mcp"))
        .header("origin", "http://evil.example")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    let origin = response.headers()["access-control-allow-origin"]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(origin, format!("http://127.0.0.1:{}", server.handle.port()));
    assert_eq!(response.headers()["vary"], "Origin");
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::default().await;

    let response = server.client.get(server.url("/mcp/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value, json!({"status": "ok", "transport": "sse"}));
}

#[tokio::test]
async fn test_auth_enforced_on_header() {
    let auth = Arc::new(AuthGatekeeper::new());
    auth.enable(EnableReason::ConfigFile);
    let token = auth.issue_token("tasks", None);

    let server = TestServer::start(
        HttpConfig {
            port: 0,
            ..HttpConfig::default()
        },
        Some(auth),
    )
    .await;
    let body = r#"{"jsonrpc":"2.0","method":"ping","id":1}"#;

    let response = server.post(body).await;
    assert_eq!(response.status(), 401);
    let value: Value = response.json().await.unwrap();
    assert_eq!(value["error"]["code"], -32001);
    assert_eq!(
        value["error"]["message"],
        "Missing or malformed Authorization header"
    );

    let response = server
        .client
        .post(server.url("/mcp"))
        .bearer_auth("not-a-real-token")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .post(server.url("/mcp"))
        .bearer_auth(&token)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_auth_ignores_header() {
    let server = TestServer::start(
        HttpConfig {
            port: 0,
            ..HttpConfig::default()
        },
        Some(Arc::new(AuthGatekeeper::new())),
    )
    .await;

    let response = server
        .client
        .post(server.url("/mcp"))
        .header("authorization", "garbage")
        .body(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

/// Reads SSE frames (`\n\n`-terminated blocks) from a streaming response.
struct SseReader {
    stream: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    /// Next non-comment frame. Keep-alive comments (`:`) are skipped.
    async fn next_frame(&mut self) -> String {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                if frame.starts_with(':') {
                    continue;
                }
                return frame;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for SSE data")
                .expect("SSE stream ended")
                .expect("SSE read failed");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Next frame for `event`, skipping any others.
    async fn next_event(&mut self, event: &str) -> String {
        let prefix = format!("event: {}\n", event);
        loop {
            let frame = self.next_frame().await;
            if frame.starts_with(&prefix) {
                return frame;
            }
        }
    }
}

async fn open_events(server: &TestServer) -> SseReader {
    let response = server
        .client
        .get(server.url("/mcp/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut reader = SseReader::new(response);
    assert_eq!(
        reader.next_frame().await,
        "event: connected\ndata: {\"status\":\"connected\"}\n\n"
    );
    reader
}

async fn wait_for_subscribers(handle: &HttpTransportHandle, expected: usize) {
    for _ in 0..200 {
        if handle.subscriber_count() == expected {
            return;
        }
        // A write is what surfaces a closed connection to the server.
        let _ = handle.broadcast("heartbeat", &json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} subscribers, found {}",
        expected,
        handle.subscriber_count()
    );
}

#[tokio::test]
async fn test_sse_broadcast_reaches_all_then_remainder() {
    let server = TestServer::default().await;

    let mut first = open_events(&server).await;
    let mut second = open_events(&server).await;
    assert_eq!(server.handle.subscriber_count(), 2);

    let delivered = server
        .handle
        .broadcast("task:completed", &json!({"id": "t1"}))
        .unwrap();
    assert_eq!(delivered, 2);

    let expected = "event: task:completed\ndata: {\"id\":\"t1\"}\n\n";
    assert_eq!(first.next_frame().await, expected);
    assert_eq!(second.next_frame().await, expected);

    drop(second);
    wait_for_subscribers(&server.handle, 1).await;

    let delivered = server
        .handle
        .broadcast("task:completed", &json!({"id": "t2"}))
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(
        first.next_event("task:completed").await,
        "event: task:completed\ndata: {\"id\":\"t2\"}\n\n"
    );
}

#[tokio::test]
async fn test_sse_requires_auth_when_enabled() {
    let auth = Arc::new(AuthGatekeeper::new());
    auth.enable(EnableReason::ConfigFile);
    let server = TestServer::start(
        HttpConfig {
            port: 0,
            ..HttpConfig::default()
        },
        Some(auth),
    )
    .await;

    let response = server
        .client
        .get(server.url("/mcp/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(server.handle.subscriber_count(), 0);
}

#[tokio::test]
async fn test_shutdown_ends_sse_streams() {
    let server = TestServer::default().await;
    let _reader = open_events(&server).await;
    assert_eq!(server.handle.subscriber_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), server.handle.wait())
        .await
        .expect("shutdown should not hang on open SSE streams");
}
