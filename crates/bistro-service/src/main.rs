use bistro_core::StorageConfig;
use bistro_service::{build_router, ServiceConfig, ServiceState};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "bistrod", version, about = "Bistro ordering REST service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Entity persistence backend. `auto` picks postgres when a database url
    /// is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "BISTRO_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for entity persistence.
    #[arg(long, env = "BISTRO_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "BISTRO_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Load the demo catalog and staff accounts on startup.
    #[arg(long, default_value_t = false)]
    seed: bool,
    /// Mutation requests allowed per user per minute.
    #[arg(long, default_value_t = 5, env = "BISTRO_THROTTLE_LIMIT")]
    throttle_limit: u32,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "bistro_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    let config = ServiceConfig {
        storage,
        seed_demo: cli.seed,
        throttle_limit: cli.throttle_limit,
        throttle_window: Duration::from_secs(60),
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(
        backend = state.engine.storage_backend(),
        "bistro-service listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app).await?;
    Ok(())
}
