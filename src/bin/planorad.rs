use std::path::PathBuf;

use clap::Parser;
use planora::config::Config;
use planora::daemon;
use planora::error::Result;

#[derive(Parser, Debug)]
#[command(name = "planorad")]
#[command(about = "Planora study-plan daemon")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PLANORA_GIT_SHA"), ")"))]
struct Cli {
    #[arg(long, env = "PLANORA_HOST")]
    host: Option<String>,

    #[arg(long, env = "PLANORA_PORT")]
    port: Option<u16>,

    #[arg(long, env = "PLANORA_DB")]
    db: Option<String>,

    /// JSON config file; defaults to `config.json` under the app data dir.
    #[arg(long, env = "PLANORA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    planora::logging::init_tracing("planorad");
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(planora::runtime_paths::default_config_path);
    let mut config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        if cli.config.is_some() {
            tracing::warn!(
                path = %config_path.display(),
                "Config file not found; using defaults"
            );
        }
        Config::convention_defaults(&planora::runtime_paths::default_db_path())
    }
    .resolve_env();

    if let Some(db) = cli.db {
        config.sqlite_path = Some(db);
    }
    let server = config.server.clone();
    let host = cli
        .host
        .or_else(|| server.as_ref().and_then(|server| server.host.clone()))
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli
        .port
        .or_else(|| server.as_ref().and_then(|server| server.port))
        .unwrap_or(8000);

    tracing::info!(version = env!("PLANORA_GIT_SHA"), "Starting planorad");
    daemon::run_with_shutdown(&host, port, config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
    })
    .await
}
