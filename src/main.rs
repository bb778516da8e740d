use anyhow::Result;
use clap::{Parser, Subcommand};

use driftwatch::clock::SystemClock;
use driftwatch::config::DriftWatchConfig;
use driftwatch::storage::SqliteStore;

#[derive(Parser)]
#[command(
    name = "driftwatch",
    about = "Statistical drift detection for service telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file. Overrides DRIFTWATCH_CONFIG and the
    /// system config path.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (HTTP API + ingestion workers + retention sweep)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Print the current health state and baseline for a service
    Health {
        service_id: String,
    },

    /// Clear a service's baseline and health state, keeping its telemetry history
    Reset {
        service_id: String,
    },

    /// Print the current ingestion pipeline configuration
    ShowConfig,
}

fn load_config(override_path: Option<&str>) -> DriftWatchConfig {
    match override_path {
        Some(path) => DriftWatchConfig::load(std::path::Path::new(path))
            .unwrap_or_else(|e| panic!("failed to load config from {path}: {e}")),
        None => DriftWatchConfig::load_or_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!(%bind, "starting driftwatch daemon");
            driftwatch::serve(&bind, cfg).await?;
        }
        Commands::Health { service_id } => {
            let pool = driftwatch::storage::open_pool(&cfg.storage.db_path)?;
            let store = SqliteStore::new(pool);
            let clock = SystemClock;
            let snapshot = driftwatch::health::get_detailed_health(&store, &clock, &service_id)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Reset { service_id } => {
            let pool = driftwatch::storage::open_pool(&cfg.storage.db_path)?;
            let store = SqliteStore::new(pool);
            let clock = SystemClock;
            driftwatch::health::reset_service(&store, &clock, &service_id)?;
            println!("service '{service_id}' reset");
        }
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
