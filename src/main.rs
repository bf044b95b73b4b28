//! Cadence - mastery progression and habit-service sync engine

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence::{
    clients::{AnkiClient, HabiticaClient, ServiceClient},
    config::{self, Args},
    db::{
        CredentialStore, MemoryCredentialStore, MongoClient, MongoCredentialStore,
    },
    state::StateStore,
    sync::Orchestrator,
    vault::VaultService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cadence={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let units = match config::load_units(&args.units_file) {
        Ok(units) => units,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Print startup banner
    info!("======================================");
    info!("  Cadence - Mastery Sync Engine");
    info!("======================================");
    info!("Extension: {}", args.extension);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Units: {} ({})", units.len(), args.units_file.display());
    info!("State dir: {}", args.state_dir.display());
    info!("Review service: {}", args.anki_url);
    info!("Habit service: {}", args.habitica_url);
    info!("MongoDB: {}", if args.dev_mode { "disabled (dev mode)" } else { args.mongodb_uri.as_str() });
    info!("Workers: {}", args.sync_workers);
    info!("Dry run: {}", args.dry_run);
    info!("======================================");

    let keyring = match args.keyring() {
        Ok(ring) => ring,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if args.dev_mode && args.vault_keys.is_none() {
        warn!("Using the fixed development vault key; never store real credentials in dev mode");
    }

    // Credential storage: MongoDB in production, in-memory in dev mode
    let credential_store: Arc<dyn CredentialStore> = if args.dev_mode {
        Arc::new(MemoryCredentialStore::new())
    } else {
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                match MongoCredentialStore::new(&client).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        error!("MongoDB collection setup failed: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let vault = Arc::new(VaultService::new(credential_store, keyring));

    let review: Arc<dyn ServiceClient> =
        match AnkiClient::new(args.anki_url.clone(), args.request_timeout_ms) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Review client setup failed: {}", e);
                std::process::exit(1);
            }
        };
    let habit: Arc<dyn ServiceClient> =
        match HabiticaClient::new(args.habitica_url.clone(), args.request_timeout_ms) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Habit client setup failed: {}", e);
                std::process::exit(1);
            }
        };

    let orchestrator = Orchestrator::new(
        units,
        args.sync_settings(),
        args.retry_policy(),
        vault,
        StateStore::new(args.state_dir.clone()),
        review,
        habit,
    );

    let summary = match orchestrator
        .sync_extensions_batch(args.usernames.clone(), args.extension, args.date, args.dry_run)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            error!("Batch sync failed: {}", e);
            std::process::exit(1);
        }
    };

    // Machine-readable summary on stdout for cron/CI callers
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_errors() {
        error!(ok = summary.ok, error = summary.error, "Batch finished with errors");
        std::process::exit(1);
    }

    info!(ok = summary.ok, "Batch finished");
    Ok(())
}
