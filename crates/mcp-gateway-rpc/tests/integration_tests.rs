//! Integration tests for the mcp-gateway-rpc binary.
//!
//! Each test spawns the real binary with an auth config path that does not
//! exist, so results never depend on the user's own configuration.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp-gateway-rpc"))
}

fn missing_auth_config() -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("mcp-gateway-no-such-auth.json")
}

fn command(transport: &str, auth_config: &Path) -> Command {
    let mut command = Command::new(binary());
    command
        .arg("--transport")
        .arg(transport)
        .arg("--auth-config")
        .arg(auth_config)
        .env_remove("MCP_AUTH_TOKEN")
        .env_remove("MCP_AUTH_SCOPE")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    command
}

/// Spawn in HTTP mode on an ephemeral port and read the `MCP_PORT=` line.
async fn start_http(env: &[(&str, &str)]) -> (Child, u16) {
    let mut command = command("http", &missing_auth_config());
    command.arg("--port").arg("0");
    for (key, value) in env {
        command.env(key, value);
    }
    let mut child = command.spawn().expect("failed to spawn mcp-gateway-rpc");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut lines = BufReader::new(stdout).lines();
    let line = tokio::time::timeout(Duration::from_secs(20), lines.next_line())
        .await
        .expect("timed out waiting for MCP_PORT")
        .unwrap()
        .expect("stdout closed before MCP_PORT");

    let port = line
        .strip_prefix("MCP_PORT=")
        .unwrap_or_else(|| panic!("unexpected first stdout line: {line}"))
        .trim()
        .parse::<u16>()
        .unwrap();
    (child, port)
}

#[tokio::test]
async fn test_stdio_ping_and_clean_exit() {
    let mut child = command("stdio", &missing_auth_config())
        .spawn()
        .expect("failed to spawn mcp-gateway-rpc");
    let mut stdin = child.stdin.take().unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    stdin
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n")
        .await
        .unwrap();
    stdin.flush().await.unwrap();

    let line = tokio::time::timeout(Duration::from_secs(20), lines.next_line())
        .await
        .expect("timed out waiting for response")
        .unwrap()
        .unwrap();
    assert_eq!(line, r#"{"jsonrpc":"2.0","result":"pong","id":1}"#);

    // EOF on stdin ends the process
    drop(stdin);
    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("process did not exit after EOF")
        .unwrap();
    assert!(status.success());
    assert!(lines.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stdio_parse_error_keeps_running() {
    let mut child = command("stdio", &missing_auth_config()).spawn().unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    stdin.write_all(b"not json\n").await.unwrap();
    stdin
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"server/info\",\"id\":2}\n")
        .await
        .unwrap();
    stdin.flush().await.unwrap();

    let mut responses = Vec::new();
    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(20), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        responses.push(serde_json::from_str::<Value>(&line).unwrap());
    }

    let parse_error = responses.iter().find(|r| r["id"].is_null()).unwrap();
    assert_eq!(parse_error["error"]["code"], -32700);
    let info = responses.iter().find(|r| r["id"] == 2).unwrap();
    assert_eq!(info["result"]["name"], "mcp-gateway-rpc");
}

#[tokio::test]
async fn test_http_mode_serves_rpc_and_health() {
    let (mut child, port) = start_http(&[]).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://127.0.0.1:{}/mcp/health", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let response: Value = client
        .post(format!("http://127.0.0.1:{}/mcp", port))
        .json(&json!({"jsonrpc": "2.0", "method": "health_check", "id": "h"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["id"], "h");
    assert_eq!(response["result"]["status"], "ok");

    let _ = child.kill().await;
}

#[tokio::test]
async fn test_http_env_token_enables_auth() {
    let (mut child, port) = start_http(&[("MCP_AUTH_TOKEN", "integration-secret")]).await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/mcp", port);
    let body = json!({"jsonrpc": "2.0", "method": "ping", "id": 1});

    let denied = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let allowed = client
        .post(&url)
        .bearer_auth("integration-secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    let _ = child.kill().await;
}

#[tokio::test]
async fn test_malformed_auth_config_fails_closed() {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("mcp-gateway-bad-auth.json");
    std::fs::write(&path, "{ definitely not json").unwrap();

    let status = Command::new(binary())
        .arg("--transport")
        .arg("http")
        .arg("--port")
        .arg("0")
        .arg("--auth-config")
        .arg(&path)
        .env_remove("MCP_AUTH_TOKEN")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_malformed_auth_config_fail_open_starts() {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("mcp-gateway-bad-auth-open.json");
    std::fs::write(&path, "{ definitely not json").unwrap();

    let mut command = command("http", &path);
    command.arg("--port").arg("0").arg("--auth-fail-open");
    let mut child = command.spawn().unwrap();

    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    let line = tokio::time::timeout(Duration::from_secs(20), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(line.starts_with("MCP_PORT="));

    let _ = child.kill().await;
}
