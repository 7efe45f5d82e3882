use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tokio::net::TcpListener;

use classlive::cli::{Cli, Commands};
use classlive::config::Config;
use classlive::gateway::Gateway;
use classlive::session::SessionHub;
use classlive::store::InMemorySessionStore;
use classlive::{AppResult, init_logging};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    match cli.command() {
        Commands::Config { action } => {
            Config::handle_command(&action, &cli.config_file)?;
            Ok(())
        }
        Commands::Serve { listen } => serve(&cli, config, listen).await,
    }
}

async fn serve(cli: &Cli, mut config: Config, listen: Option<String>) -> AppResult<()> {
    if let Some(addr) = listen {
        config.server.listen_addr = addr;
    }
    config.validate()?;

    // Initialize logging
    let _log_guard = init_logging(&cli.effective_log_level(&config.log_level), &config.log)?;

    tracing::info!("ClassLive session hub starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    let store = match &config.store.seed_file {
        Some(path) => InMemorySessionStore::load_seed_file(path)?,
        None => {
            tracing::warn!("No store.seed_file configured, starting with an empty session store");
            InMemorySessionStore::new()
        }
    };

    let hub = Arc::new(SessionHub::new(Arc::new(store), &config.relay));
    spawn_status_reporter(hub.clone(), config.server.status_interval_secs);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    println!(
        "{} ws://{}{}/<session_id>/",
        "ClassLive listening on".green().bold(),
        config.server.listen_addr,
        config.gateway.path_prefix
    );

    let gateway = Gateway::new(hub, &config.gateway);
    gateway
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("ClassLive session hub stopped");
    Ok(())
}

fn spawn_status_reporter(hub: Arc<SessionHub>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = hub.metrics().snapshot();
            tracing::info!(
                live_connections = snapshot.live_connections(),
                groups = hub.registry().group_count(),
                broadcasts = snapshot.broadcasts,
                delivery_failures = snapshot.delivery_failures,
                transitions = snapshot.transitions,
                signals_relayed = snapshot.signals_relayed,
                "hub status"
            );
        }
    });
}
