// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot::server::{DepotConfig, run_server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about = "Private artifact registry with self-update feeds", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "/etc/depot/depot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Create the catalog database and storage directories
    Init,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = DepotConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let server_config = config.to_server_config()?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(run_server(server_config))
        }
        Commands::Init => {
            let db_path = config.database_path();
            info!("Initializing Depot catalog at: {}", db_path.display());
            depot::db::init(&db_path)?;

            if config.storage.backend == "local" {
                let objects = config.storage.root.join("objects");
                std::fs::create_dir_all(&objects)
                    .with_context(|| format!("Failed to create {}", objects.display()))?;
            }

            println!("Catalog initialized successfully at: {}", db_path.display());
            Ok(())
        }
        Commands::CheckConfig => {
            let server_config = config.to_server_config()?;
            println!("Configuration OK: {}", cli.config.display());
            println!("  bind:    {}", server_config.bind_addr);
            println!("  public:  {}", server_config.public_url);
            println!("  catalog: {}", server_config.db_path.display());
            println!("  storage: {}", config.storage.backend);
            println!(
                "  rate limit: {}",
                match server_config.rate_limit {
                    Some(limits) => format!("{} rps, burst {}", limits.requests_per_second, limits.burst),
                    None => "disabled".to_string(),
                }
            );
            Ok(())
        }
    }
}
