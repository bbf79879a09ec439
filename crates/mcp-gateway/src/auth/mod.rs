//! Bearer-token and PKCE authorization.
//!
//! The [`AuthGatekeeper`] owns the token, client and pending-exchange tables.
//! It starts **Disabled**, where every check passes with scope `*`, and moves
//! to **Enabled** only through [`AuthGatekeeper::enable`]: configuration
//! `enabled: true`, a static token from the environment, or a client
//! registration. Each transition is logged with its reason.
//!
//! Declines are values ([`AuthDecision`]), never errors. The transport that
//! asked decides how to enforce them.
//!
//! # Thread Safety
//!
//! Each table sits behind its own `RwLock`. A poisoned lock is recovered
//! rather than propagated, since every mutation leaves the maps consistent.

pub mod pkce;

use crate::config::{AuthConfigFile, AuthDefaults, ConfigFailurePolicy, StaticToken};
use crate::protocol::{EnvelopeGuard, Request};
use crate::{GatewayError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pkce::PkceMethod;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Gatekeeper enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Disabled,
    Enabled,
}

/// Why the gatekeeper moved to [`AuthState::Enabled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableReason {
    ConfigFile,
    EnvironmentToken,
    ClientRegistered,
}

impl std::fmt::Display for EnableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnableReason::ConfigFile => write!(f, "configuration file"),
            EnableReason::EnvironmentToken => write!(f, "{} environment variable", AuthDefaults::TOKEN_ENV),
            EnableReason::ClientRegistered => write!(f, "client registration"),
        }
    }
}

/// Outcome of an auth check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthDecision {
    pub fn allow(scope: impl Into<String>) -> Self {
        Self {
            valid: true,
            scope: Some(scope.into()),
            error: None,
        }
    }

    pub fn deny(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            scope: None,
            error: Some(error.into()),
        }
    }
}

/// A stored bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub scope: String,
    /// `None` = never expires.
    pub expires_at: Option<SystemTime>,
}

impl AuthToken {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// An OAuth client allowed to run the authorization-code flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
    /// Empty = unrestricted.
    pub scopes: Vec<String>,
}

impl RegisteredClient {
    fn allows_scope(&self, requested: &str) -> bool {
        if self.scopes.is_empty() || self.scopes.iter().any(|s| s == AuthDefaults::WILDCARD_SCOPE) {
            return true;
        }
        requested
            .split_whitespace()
            .all(|part| self.scopes.iter().any(|s| s == part))
    }

    fn default_scope(&self) -> String {
        if self.scopes.is_empty() {
            AuthDefaults::WILDCARD_SCOPE.to_string()
        } else {
            self.scopes.join(" ")
        }
    }
}

/// An authorization code waiting to be exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPkceExchange {
    pub client_id: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub scope: String,
    pub expires_at: SystemTime,
}

/// Parameters of an authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'a str,
    pub scope: Option<&'a str>,
}

/// Token handed out by a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub scope: String,
    pub expires_in: u64,
}

/// Why an authorization-code flow step was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFlowError {
    #[error("Unknown client: {0}")]
    UnknownClient(String),
    #[error("Redirect URI does not match registration")]
    RedirectMismatch,
    #[error("Scope not allowed: {0}")]
    ScopeNotAllowed(String),
    #[error("Unsupported code challenge method: {0}")]
    UnsupportedChallengeMethod(String),
    #[error("Invalid authorization code")]
    InvalidCode,
    #[error("Authorization code expired")]
    CodeExpired,
    #[error("Authorization code was issued to another client")]
    ClientMismatch,
    #[error("PKCE verification failed")]
    PkceMismatch,
}

/// Owns all authorization state. Transport independent.
#[derive(Debug)]
pub struct AuthGatekeeper {
    state: RwLock<AuthState>,
    tokens: RwLock<HashMap<String, AuthToken>>,
    clients: RwLock<HashMap<String, RegisteredClient>>,
    pending: RwLock<HashMap<String, PendingPkceExchange>>,
}

impl Default for AuthGatekeeper {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn random_token() -> String {
    let mut bytes = [0u8; AuthDefaults::TOKEN_BYTES];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl AuthGatekeeper {
    /// A gatekeeper in the Disabled state with empty tables.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AuthState::Disabled),
            tokens: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Build from the well-known config file and the environment.
    ///
    /// `path` defaults to [`AuthConfigFile::default_path`].
    pub fn load(path: Option<&Path>, policy: ConfigFailurePolicy) -> Result<Self> {
        let file = match path.map(Path::to_path_buf).or_else(AuthConfigFile::default_path) {
            Some(path) => AuthConfigFile::load(&path),
            None => Ok(None),
        };
        Self::from_sources(file, StaticToken::from_env(), policy)
    }

    /// Build from already-loaded sources.
    ///
    /// A config load failure is handled by `policy`: `FailClosed` returns the
    /// error, `FailOpen` logs it and leaves file-based auth disabled. The
    /// static token is applied either way.
    pub fn from_sources(
        file: Result<Option<AuthConfigFile>>,
        static_token: Option<StaticToken>,
        policy: ConfigFailurePolicy,
    ) -> Result<Self> {
        let gatekeeper = Self::new();

        match file {
            Ok(Some(config)) => gatekeeper.apply_config(config),
            Ok(None) => {}
            Err(e) => match policy {
                ConfigFailurePolicy::FailClosed => return Err(e),
                ConfigFailurePolicy::FailOpen => {
                    error!("Auth configuration unusable, continuing with auth DISABLED (fail-open): {}", e);
                    gatekeeper.disable();
                }
            },
        }

        if let Some(token) = static_token {
            gatekeeper.insert_token(token.value, token.scope, None);
            gatekeeper.enable(EnableReason::EnvironmentToken);
        }

        Ok(gatekeeper)
    }

    fn apply_config(&self, config: AuthConfigFile) {
        {
            let mut clients = write(&self.clients);
            for client in config.clients {
                clients.insert(
                    client.id.clone(),
                    RegisteredClient {
                        id: client.id,
                        secret: client.secret,
                        redirect_uri: client.redirect_uri,
                        scopes: client.scopes,
                    },
                );
            }
        }

        for token in config.tokens {
            let expires_at = token
                .expires_at
                .and_then(|ms| UNIX_EPOCH.checked_add(Duration::from_millis(ms)));
            self.insert_token(token.value, token.scope, expires_at);
        }

        if config.enabled {
            self.enable(EnableReason::ConfigFile);
        }
    }

    // ========================================================================
    // State machine
    // ========================================================================

    pub fn state(&self) -> AuthState {
        *read(&self.state)
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == AuthState::Enabled
    }

    /// Disabled → Enabled. Idempotent.
    pub fn enable(&self, reason: EnableReason) {
        let mut state = write(&self.state);
        if *state == AuthState::Disabled {
            info!("Authorization enabled by {}", reason);
            *state = AuthState::Enabled;
        }
    }

    /// Enabled → Disabled. Idempotent.
    pub fn disable(&self) {
        let mut state = write(&self.state);
        if *state == AuthState::Enabled {
            warn!("Authorization disabled");
            *state = AuthState::Disabled;
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Validate an envelope using its out-of-band metadata
    /// (`params._meta.authorization`), for transports with no header channel.
    pub fn validate(&self, request: &Request) -> AuthDecision {
        if !self.is_enabled() {
            return AuthDecision::allow(AuthDefaults::WILDCARD_SCOPE);
        }

        let credential = request
            .params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("authorization"))
            .and_then(Value::as_str);

        match credential {
            Some(value) => {
                let token = strip_bearer(value).unwrap_or(value).trim();
                if token.is_empty() {
                    AuthDecision::deny("Missing authorization")
                } else {
                    self.validate_token(token)
                }
            }
            None => AuthDecision::deny("Missing authorization"),
        }
    }

    /// Validate a literal `Authorization` header value.
    pub fn validate_header(&self, header: Option<&str>) -> AuthDecision {
        if !self.is_enabled() {
            return AuthDecision::allow(AuthDefaults::WILDCARD_SCOPE);
        }

        match header.and_then(strip_bearer).map(str::trim) {
            Some(token) if !token.is_empty() => self.validate_token(token),
            _ => AuthDecision::deny("Missing or malformed Authorization header"),
        }
    }

    /// Look up `token`. An expired entry is removed on the way out.
    pub fn validate_token(&self, token: &str) -> AuthDecision {
        let mut tokens = write(&self.tokens);
        let Some(entry) = tokens.get(token) else {
            return AuthDecision::deny("Invalid token");
        };

        if entry.is_expired(SystemTime::now()) {
            tokens.remove(token);
            debug!("Removed expired token");
            return AuthDecision::deny("Token expired");
        }

        AuthDecision::allow(entry.scope.clone())
    }

    /// Check a PKCE verifier against an S256 challenge.
    pub fn validate_pkce(&self, verifier: &str, challenge: &str) -> bool {
        pkce::verify_s256(verifier, challenge)
    }

    // ========================================================================
    // Token management
    // ========================================================================

    /// Mint and store a 256-bit opaque token. Meant for tests and automation;
    /// interactive clients go through [`Self::exchange_code`].
    pub fn issue_token(&self, scope: impl Into<String>, ttl: Option<Duration>) -> String {
        let token = random_token();
        // A ttl past the representable range never expires
        let expires_at = ttl.and_then(|ttl| SystemTime::now().checked_add(ttl));
        self.insert_token(token.clone(), scope.into(), expires_at);
        token
    }

    /// Store a token minted elsewhere (configuration, environment).
    pub fn insert_token(&self, token: String, scope: String, expires_at: Option<SystemTime>) {
        write(&self.tokens).insert(
            token.clone(),
            AuthToken {
                token,
                scope,
                expires_at,
            },
        );
    }

    /// Remove `token`. Returns whether it existed.
    pub fn revoke_token(&self, token: &str) -> bool {
        write(&self.tokens).remove(token).is_some()
    }

    pub fn token_count(&self) -> usize {
        read(&self.tokens).len()
    }

    /// Drop expired tokens and authorization codes.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        {
            let mut tokens = write(&self.tokens);
            let before = tokens.len();
            tokens.retain(|_, t| !t.is_expired(now));
            removed += before - tokens.len();
        }
        {
            let mut pending = write(&self.pending);
            let before = pending.len();
            pending.retain(|_, p| now < p.expires_at);
            removed += before - pending.len();
        }

        if removed > 0 {
            debug!("Purged {} expired auth entries", removed);
        }
        removed
    }

    // ========================================================================
    // Clients and the authorization-code flow
    // ========================================================================

    /// Register a client. Always leaves the gatekeeper Enabled.
    pub fn register_client(&self, id: impl Into<String>, mut record: RegisteredClient) {
        let id = id.into();
        record.id = id.clone();
        write(&self.clients).insert(id.clone(), record);
        info!("Registered client {}", id);
        self.enable(EnableReason::ClientRegistered);
    }

    pub fn client_count(&self) -> usize {
        read(&self.clients).len()
    }

    /// Check a client's secret.
    pub fn authenticate_client(&self, id: &str, secret: &str) -> bool {
        read(&self.clients)
            .get(id)
            .is_some_and(|c| pkce::constant_time_eq(c.secret.as_bytes(), secret.as_bytes()))
    }

    /// Start an authorization-code exchange and return the code.
    pub fn begin_authorization(
        &self,
        request: AuthorizationRequest<'_>,
    ) -> std::result::Result<String, AuthFlowError> {
        if PkceMethod::parse(request.code_challenge_method).is_none() {
            return Err(AuthFlowError::UnsupportedChallengeMethod(
                request.code_challenge_method.to_string(),
            ));
        }

        let scope = {
            let clients = read(&self.clients);
            let client = clients
                .get(request.client_id)
                .ok_or_else(|| AuthFlowError::UnknownClient(request.client_id.to_string()))?;

            if client.redirect_uri != request.redirect_uri {
                return Err(AuthFlowError::RedirectMismatch);
            }

            match request.scope {
                Some(scope) if !client.allows_scope(scope) => {
                    return Err(AuthFlowError::ScopeNotAllowed(scope.to_string()))
                }
                Some(scope) => scope.to_string(),
                None => client.default_scope(),
            }
        };

        let code = random_token();
        write(&self.pending).insert(
            code.clone(),
            PendingPkceExchange {
                client_id: request.client_id.to_string(),
                code_challenge: request.code_challenge.to_string(),
                redirect_uri: request.redirect_uri.to_string(),
                scope,
                expires_at: SystemTime::now() + AuthDefaults::AUTHORIZATION_CODE_TTL,
            },
        );

        debug!("Issued authorization code for client {}", request.client_id);
        Ok(code)
    }

    /// Redeem an authorization code. Codes are single-use: the pending entry
    /// is consumed whether or not the exchange succeeds.
    pub fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        verifier: &str,
    ) -> std::result::Result<IssuedToken, AuthFlowError> {
        let pending = write(&self.pending)
            .remove(code)
            .ok_or(AuthFlowError::InvalidCode)?;

        if SystemTime::now() >= pending.expires_at {
            return Err(AuthFlowError::CodeExpired);
        }
        if pending.client_id != client_id {
            warn!("Authorization code presented by wrong client {}", client_id);
            return Err(AuthFlowError::ClientMismatch);
        }
        if !pkce::verify_s256(verifier, &pending.code_challenge) {
            return Err(AuthFlowError::PkceMismatch);
        }

        let ttl = AuthDefaults::EXCHANGED_TOKEN_TTL;
        let access_token = self.issue_token(pending.scope.clone(), Some(ttl));
        info!("Exchanged authorization code for client {}", client_id);

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer",
            scope: pending.scope,
            expires_in: ttl.as_secs(),
        })
    }
}

impl EnvelopeGuard for AuthGatekeeper {
    fn admit(&self, request: &Request) -> std::result::Result<(), String> {
        let decision = self.validate(request);
        if decision.valid {
            Ok(())
        } else {
            Err(decision.error.unwrap_or_else(|| "Unauthorized".to_string()))
        }
    }
}

/// Strip a case-insensitive `Bearer ` prefix.
fn strip_bearer(value: &str) -> Option<&str> {
    const PREFIX: &str = "Bearer ";
    let head = value.get(..PREFIX.len())?;
    head.eq_ignore_ascii_case(PREFIX).then(|| &value[PREFIX.len()..])
}

impl From<AuthFlowError> for GatewayError {
    fn from(err: AuthFlowError) -> Self {
        GatewayError::Unauthorized {
            message: err.to_string(),
        }
    }
}
