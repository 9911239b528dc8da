use anyhow::Result;
use oxwatch_server::config::{RulesSeedFile, ServerConfig};
use oxwatch_server::housekeeping::Housekeeping;
use oxwatch_server::state::AppState;
use oxwatch_server::{app, rule_seed, scheduler};
use oxwatch_storage::SqliteStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxwatch-server [config.toml]                          Start the server");
    eprintln!("  oxwatch-server init-rules <config.toml> <seed.json>   Initialize alert rules from seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    oxwatch_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxwatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <seed.json> argument")
            })?;
            run_init_rules(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = SqliteStore::open(Path::new(&config.data_dir))?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: RulesSeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    rule_seed::init_from_seed(&store, &seed).await?;
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        evaluation_tick_secs = config.evaluation.tick_secs,
        channels = config.notification.channels.len(),
        "oxwatch-server starting"
    );

    let state = AppState::build(config).await?;
    let config = state.config.clone();
    let alerts = state.alerts.clone();
    let grace = Duration::from_secs(config.evaluation.shutdown_grace_secs);

    let mut schedulers = Vec::new();
    if config.evaluation.enabled {
        schedulers.push(scheduler::spawn(
            state.alerts.clone(),
            Duration::from_secs(config.evaluation.tick_secs.max(1)),
            grace,
        ));
    } else {
        tracing::warn!("Scheduled alert evaluation is disabled");
    }
    if config.housekeeping.enabled {
        let housekeeping = Housekeeping::new(
            state.store.clone(),
            config.retention_days,
            config.resolved_retention_days,
        );
        schedulers.push(scheduler::spawn(
            Arc::new(housekeeping),
            Duration::from_secs(config.housekeeping.tick_secs.max(1)),
            grace,
        ));
    }

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP server listening");

    let result = axum::serve(http_listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server error");
    }

    for handle in schedulers {
        handle.stop().await;
    }
    if tokio::time::timeout(grace, alerts.flush_notifications())
        .await
        .is_err()
    {
        tracing::warn!("Pending notifications abandoned at shutdown");
    }

    tracing::info!("oxwatch-server stopped");
    result.map_err(Into::into)
}
