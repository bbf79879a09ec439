//! Centralized configuration for the gateway.
//!
//! Protocol limits and transport defaults are associated constants on unit
//! structs. The auth configuration file and its environment fallback are
//! loaded here and handed to [`crate::auth::AuthGatekeeper`].

use crate::{GatewayError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Protocol-level limits shared by both transports.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Largest accepted frame or request body (10 MiB).
    pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
    /// Read buffer size for the stream transport.
    pub const STREAM_READ_CHUNK: usize = 8192;
}

/// Network transport defaults.
pub struct HttpDefaults;

impl HttpDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 3000;
    pub const RPC_PATH: &'static str = "/mcp";
    pub const HEALTH_PATH: &'static str = "/mcp/health";
    pub const EVENTS_PATH: &'static str = "/mcp/events";
    pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
    /// Per-subscriber queue depth; a subscriber this far behind misses events.
    pub const SUBSCRIBER_QUEUE: usize = 64;
}

/// Auth defaults.
pub struct AuthDefaults;

impl AuthDefaults {
    pub const CONFIG_DIR_NAME: &'static str = "mcp-gateway";
    pub const CONFIG_FILE_NAME: &'static str = "mcp-auth.json";
    pub const CONFIG_PATH_ENV: &'static str = "MCP_AUTH_CONFIG";
    pub const TOKEN_ENV: &'static str = "MCP_AUTH_TOKEN";
    pub const SCOPE_ENV: &'static str = "MCP_AUTH_SCOPE";
    pub const WILDCARD_SCOPE: &'static str = "*";
    pub const AUTHORIZATION_CODE_TTL: Duration = Duration::from_secs(600);
    pub const EXCHANGED_TOKEN_TTL: Duration = Duration::from_secs(3600);
    pub const TOKEN_BYTES: usize = 32;
}

/// Cross-origin policy for the network transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CorsPolicy {
    /// Only the server's own origin (`http://<host>:<port>`).
    #[default]
    LocalOrigin,
    /// Explicit allow-list of origins.
    Origins(Vec<String>),
    /// `Access-Control-Allow-Origin: *`. Opt-in only.
    Any,
}

/// Network transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    /// Port to listen on (0 = auto-assign)
    pub port: u16,
    /// Binding a non-loopback interface requires this to be set.
    pub allow_remote: bool,
    pub cors: CorsPolicy,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: HttpDefaults::HOST.to_string(),
            port: HttpDefaults::PORT,
            allow_remote: false,
            cors: CorsPolicy::default(),
            max_body_bytes: ProtocolConfig::MAX_MESSAGE_BYTES,
        }
    }
}

/// What to do when the auth configuration file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFailurePolicy {
    /// Refuse to start.
    #[default]
    FailClosed,
    /// Log the failure and run with file-based auth disabled.
    FailOpen,
}

/// On-disk auth configuration (`mcp-auth.json`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigFile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    pub value: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Absolute expiry in milliseconds since the Unix epoch; `None` = never.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

fn default_scope() -> String {
    AuthDefaults::WILDCARD_SCOPE.to_string()
}

/// Static bearer token supplied through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticToken {
    pub value: String,
    pub scope: String,
}

impl StaticToken {
    /// Read `MCP_AUTH_TOKEN` / `MCP_AUTH_SCOPE`.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(
            std::env::var(AuthDefaults::TOKEN_ENV).ok(),
            std::env::var(AuthDefaults::SCOPE_ENV).ok(),
        )
    }

    pub fn from_vars(token: Option<String>, scope: Option<String>) -> Option<Self> {
        let value = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
        let scope = scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(default_scope);
        Some(Self { value, scope })
    }
}

impl AuthConfigFile {
    /// Default location: `<config dir>/mcp-gateway/mcp-auth.json`, unless
    /// `MCP_AUTH_CONFIG` points elsewhere.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(AuthDefaults::CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| {
            dir.join(AuthDefaults::CONFIG_DIR_NAME)
                .join(AuthDefaults::CONFIG_FILE_NAME)
        })
    }

    /// Load the file at `path`.
    ///
    /// A missing file is not an error and yields `Ok(None)`. An unreadable or
    /// malformed file yields `GatewayError::Config`; the caller applies its
    /// [`ConfigFailurePolicy`].
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No auth config at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(GatewayError::config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            GatewayError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}
