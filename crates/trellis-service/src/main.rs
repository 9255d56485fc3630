use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use trellis_core::{EngineConfig, LogStorageConfig};
use trellis_service::{build_router, ServiceConfig, ServiceState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "trellisd", version, about = "Trellis lifecycle REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8084
    #[arg(long, default_value = "127.0.0.1:8084")]
    listen: SocketAddr,
    /// Transition log backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = LogStorageMode::Auto, env = "TRELLIS_LOG_STORAGE")]
    log_storage: LogStorageMode,
    /// PostgreSQL url for transition log persistence.
    #[arg(long, env = "TRELLIS_LOG_DATABASE_URL")]
    log_database_url: Option<String>,
    /// Max PostgreSQL pool connections for transition log persistence.
    #[arg(long, default_value_t = 5, env = "TRELLIS_LOG_PG_MAX_CONNECTIONS")]
    log_pg_max_connections: u32,
    /// Endpoint that receives signed lifecycle event webhooks.
    #[arg(long, env = "TRELLIS_WEBHOOK_URL")]
    webhook_url: Option<String>,
    /// Shared secret the webhook signature is derived from.
    #[arg(long, env = "TRELLIS_WEBHOOK_SECRET")]
    webhook_secret: Option<String>,
    /// Requests allowed per rate-limit window for trigger endpoints.
    #[arg(long, default_value_t = 30)]
    rate_limit_max: u32,
    /// Rate-limit window length in seconds.
    #[arg(long, default_value_t = 60)]
    rate_limit_window_secs: u64,
}

fn resolve_log_storage(cli: &Cli) -> anyhow::Result<LogStorageConfig> {
    let resolved_url = cli
        .log_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.log_storage {
        LogStorageMode::Memory => LogStorageConfig::Memory,
        LogStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "log_storage=postgres requires --log-database-url or DATABASE_URL"
                )
            })?;
            LogStorageConfig::postgres(database_url, cli.log_pg_max_connections)
        }
        LogStorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                LogStorageConfig::postgres(database_url, cli.log_pg_max_connections)
            } else {
                LogStorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trellis_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    if cli.webhook_url.is_some() && cli.webhook_secret.is_none() {
        anyhow::bail!("--webhook-url requires --webhook-secret");
    }

    let log_storage = resolve_log_storage(&cli)?;
    let config = ServiceConfig {
        log_storage,
        engine: EngineConfig::default(),
        webhook_url: cli.webhook_url,
        webhook_secret: cli.webhook_secret,
        rate_limit_max: cli.rate_limit_max,
        rate_limit_window: Duration::from_secs(cli.rate_limit_window_secs),
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("trellis-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
