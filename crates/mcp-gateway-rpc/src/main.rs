//! MCP Gateway RPC - JSON-RPC front end over stdio or HTTP+SSE.
//!
//! In stdio mode stdout carries only protocol lines; all logging goes to
//! stderr. In HTTP mode the bound port is printed to stdout as
//! `MCP_PORT=<port>` so a parent process can discover it.

mod handler;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use handler::BuiltinHandler;
use mcp_gateway::config::HttpDefaults;
use mcp_gateway::{
    AuthGatekeeper, ConfigFailurePolicy, CorsPolicy, Dispatcher, HttpConfig, HttpTransport,
    StreamTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How often expired tokens and authorization codes are swept.
const AUTH_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Stdio,
    Http,
}

#[derive(Parser, Debug)]
#[command(name = "mcp-gateway-rpc")]
#[command(about = "JSON-RPC gateway over stdio or HTTP+SSE")]
struct Args {
    /// Transport to serve on
    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    transport: TransportKind,

    /// Host to bind to (http only)
    #[arg(long, default_value = HttpDefaults::HOST)]
    host: String,

    /// Port to listen on, 0 = auto-assign (http only)
    #[arg(short, long, default_value_t = HttpDefaults::PORT)]
    port: u16,

    /// Allow binding a non-loopback interface
    #[arg(long)]
    allow_remote: bool,

    /// Send `Access-Control-Allow-Origin: *` instead of the local origin
    #[arg(long)]
    cors_any: bool,

    /// Auth configuration file (defaults to the user config directory)
    #[arg(long)]
    auth_config: Option<PathBuf>,

    /// Start with auth disabled if the auth configuration cannot be parsed
    #[arg(long)]
    auth_fail_open: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs always go to stderr; stdout belongs to the protocol
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting MCP gateway ({:?})", args.transport);

    let policy = if args.auth_fail_open {
        ConfigFailurePolicy::FailOpen
    } else {
        ConfigFailurePolicy::FailClosed
    };
    let auth = Arc::new(AuthGatekeeper::load(args.auth_config.as_deref(), policy)?);
    info!(
        "Authorization {}",
        if auth.is_enabled() { "enabled" } else { "disabled" }
    );

    let purge = {
        let auth = auth.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(AUTH_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                auth.purge_expired();
            }
        })
    };

    let handler = Arc::new(BuiltinHandler::new());
    let result = match args.transport {
        TransportKind::Stdio => run_stdio(handler, auth).await,
        TransportKind::Http => run_http(&args, handler, auth).await,
    };

    purge.abort();
    result
}

async fn run_stdio(handler: Arc<BuiltinHandler>, auth: Arc<AuthGatekeeper>) -> Result<()> {
    let dispatcher = Dispatcher::new(handler).with_guard(auth);
    let handle = StreamTransport::new(dispatcher).stdio();

    tokio::select! {
        result = handle.wait() => {
            result?;
            info!("Input closed, exiting");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, exiting");
            // The blocking stdin reader would otherwise hold the runtime open
            std::process::exit(0);
        }
    }

    Ok(())
}

async fn run_http(args: &Args, handler: Arc<BuiltinHandler>, auth: Arc<AuthGatekeeper>) -> Result<()> {
    let config = HttpConfig {
        host: args.host.clone(),
        port: args.port,
        allow_remote: args.allow_remote,
        cors: if args.cors_any {
            CorsPolicy::Any
        } else {
            CorsPolicy::LocalOrigin
        },
        ..HttpConfig::default()
    };

    let handle = HttpTransport::new(config, Dispatcher::new(handler))
        .with_auth(auth)
        .start()
        .await?;

    // Print port for the parent process to read (intentional stdout)
    println!("MCP_PORT={}", handle.port());

    info!("MCP gateway running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.wait().await;

    Ok(())
}
