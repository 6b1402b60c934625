use clap::{Parser, Subcommand};
use pulse::config::AppConfig;
use pulse::seed::{self, SeedOptions};
use pulse::{routes, storage};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "pulse", about = "Self-hosted product analytics service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Replace all data with generated demo users and activity
    SeedDemo {
        #[arg(long, default_value_t = 40)]
        users: usize,
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!(db = %config.database.path.display(), "database initialized");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::SeedDemo { users, days } => {
            let summary = seed::seed_demo(
                &pool,
                SeedOptions {
                    users,
                    days: days.max(1),
                },
            )
            .await?;
            println!(
                "Seeded {} users and {} events. Demo password: {}",
                summary.users,
                summary.events,
                seed::DEMO_PASSWORD
            );
            println!("Demo API key (shown once): {}", summary.api_key);
            Ok(())
        }
    }
}

async fn serve(
    config: AppConfig,
    pool: deadpool_sqlite::Pool,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = routes::build_router(&config, pool)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        rate_limit = config.rate_limit.enabled,
        metrics_cache_ttl = config.metrics.cache_ttl_secs,
        "listening"
    );

    // Per-IP rate limiting needs the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
