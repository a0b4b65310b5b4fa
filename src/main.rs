use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use mixmaster::{
    config::MixConfig,
    database::DatabasePool,
    draft::DraftCoordinator,
    events::EventBus,
    identity::IdentityReconciler,
    reputation::{HttpReputationLookup, ReputationChecker},
    servers::ServerRegistry,
    stats::{HttpLogSource, LogImporter, StatsAggregator},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(MixConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?);

    init_logging(&config)?;
    info!("starting mixmaster coordination service");

    // Persistence comes up first; migrations run before any service.
    let db = Arc::new(DatabasePool::connect(&config.database).await?);
    let pending = db.migrate().await?;

    let bus = EventBus::default();

    // Statistics pipeline.
    let aggregator = Arc::new(StatsAggregator::new(db.clone()));
    let log_source = Arc::new(HttpLogSource::new(&config.import)?);
    let importer = Arc::new(LogImporter::new(
        db.clone(),
        log_source,
        aggregator.clone(),
        bus.clone(),
    ));

    // Identity pipeline.
    let store = Arc::new(db.identity_store());
    let lookup = Arc::new(HttpReputationLookup::new(&config.reputation)?);
    let (checker, resolutions) = ReputationChecker::new(store.clone(), lookup, &config.reputation);
    let checker = Arc::new(checker);
    checker.spawn_backlog_drain(Duration::from_secs(config.reputation.backlog_interval_secs));

    let reconciler = IdentityReconciler::new(
        store,
        checker.clone(),
        bus.clone(),
        &config.identity,
        config.voice.channel_tags.clone(),
    );
    reconciler.spawn_resolution_pump(resolutions);

    let registry = Arc::new(ServerRegistry::new(bus.clone(), config.game.maps.clone()));
    let _draft = Arc::new(DraftCoordinator::new(
        reconciler.clone(),
        registry.clone(),
        bus.clone(),
    ));

    // Schema changes invalidate derived rows; replay everything.
    if pending > 0 {
        info!(migrations = pending, "schema changed, replaying stored logs");
        match importer.refresh_all().await {
            Ok(outcome) => info!(
                total = outcome.total,
                failed = outcome.failed,
                "log replay finished"
            ),
            Err(error) => warn!(%error, "log replay failed"),
        }
    }

    info!("mixmaster ready; session adapters may connect");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    Ok(())
}

fn init_logging(config: &MixConfig) -> Result<()> {
    let level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;
    Ok(())
}
