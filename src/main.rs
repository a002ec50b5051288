use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tracker_engine::Collaborators;
use tracker_store::{AoRepo, Database, EntityRepo, HierarchyRepo, TokenAuthenticator, ViolationRepo};
use tracker_telemetry::TelemetryConfig;

/// Real-time scoped location broadcast and geofence server.
#[derive(Debug, Parser)]
#[command(name = "tracker", version)]
struct Cli {
    /// Settings file (defaults to ~/.tracker/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding settings.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, overriding settings.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => tracker_settings::load_settings_from_path(path),
        None => tracker_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = cli.db {
        settings.database.path = db;
    }

    let _telemetry = tracker_telemetry::init_telemetry(
        TelemetryConfig {
            log_to_sqlite: settings.telemetry.log_to_sqlite,
            log_db_path: settings.telemetry.log_db_path.clone(),
            ..Default::default()
        }
        .with_level_str(&settings.telemetry.log_level),
    );

    tracing::info!("starting tracker server");

    let db = Database::open(&settings.database.path)
        .with_context(|| format!("failed to open database at {}", settings.database.path.display()))?;

    let entities = Arc::new(EntityRepo::new(db.clone()));
    let collab = Collaborators {
        hierarchy: Arc::new(HierarchyRepo::new(db.clone())),
        aos: Arc::new(AoRepo::new(db.clone())),
        entities: entities.clone(),
        presence: entities,
        violations: Arc::new(ViolationRepo::new(db.clone())),
    };
    let authenticator = Arc::new(TokenAuthenticator::new(db));

    let handle = tracker_server::start(settings, collab, authenticator)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "tracker server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
