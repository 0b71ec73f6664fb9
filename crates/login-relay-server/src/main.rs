use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use login_relay_core::tracing_init::{DEFAULT_FILTER, init_tracing};
use login_relay_core::{RelayConfig, config};
use login_relay_server::routes::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "login-relay")]
#[command(version, about = "HTTP to TCP relay for backend login commands")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "LISTEN_ADDR")]
    addr: SocketAddr,

    /// Default backend host. The env name keeps the spelling deployments already use.
    #[arg(long, default_value = config::DEFAULT_BACKEND_HOST, env = "IP_ADRESS")]
    backend_host: String,

    /// Default backend port (not the HTTP listen port).
    #[arg(long, default_value_t = config::DEFAULT_BACKEND_PORT, env = "PORT")]
    backend_port: u16,

    /// Backend connect timeout in milliseconds.
    #[arg(long, default_value_t = 3000, env = "CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: u64,

    /// Backend reply timeout in milliseconds.
    #[arg(long, default_value_t = 1000, env = "READ_TIMEOUT_MS")]
    read_timeout_ms: u64,

    /// Longest accepted backend reply line.
    #[arg(long, default_value_t = 64 * 1024, env = "MAX_RESPONSE_BYTES")]
    max_response_bytes: usize,

    /// Answer `200 null` instead of `502` when the backend is unreachable.
    #[arg(long, env = "LEGACY_STATUS")]
    legacy_status: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            backend_host: self.backend_host.clone(),
            backend_port: self.backend_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_response_bytes: self.max_response_bytes,
            legacy_status: self.legacy_status,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(DEFAULT_FILTER, args.log_json);

    let relay_config = args.relay_config();
    relay_config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        backend_host = %relay_config.backend_host,
        backend_port = relay_config.backend_port,
        legacy_status = relay_config.legacy_status,
        "Starting login-relay"
    );

    let app = build_router(AppState::new(relay_config));
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
        })
        .await?;

    info!("login-relay stopped");
    Ok(())
}
