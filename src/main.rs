use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediashelf::{build_state, commands::check_storage::check_storage, config::Config, create_app};

#[derive(Parser)]
#[command(name = "mediashelf")]
#[command(about = "Media ingestion and storage service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Build every configured storage backend and probe it with a small write
    CheckStorage,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CheckStorage => check_storage(&config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting mediashelf");
    info!(
        "Max file size: {} MB, derivative sizes: {}",
        config.max_file_size_mb,
        config
            .derivative_sizes
            .iter()
            .map(|s| format!("{}:{}x{}", s.name, s.max_width, s.max_height))
            .collect::<Vec<_>>()
            .join(",")
    );

    let address = config.server_address.clone();
    let state = build_state(config).await?;

    let available = state.storage.available();
    info!(
        "Storage backends available: {}",
        available.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(", ")
    );
    for (name, e) in state.storage.unavailable() {
        tracing::warn!("Storage backend '{}' unavailable: {}", name, e);
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);
    axum::serve(listener, app).await?;

    Ok(())
}
