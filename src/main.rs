//! Songmarks - opens the local store and reports what it holds

use songmarks::{EngineConfig, SyncManager};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let config = EngineConfig::load();
    info!("Using database {}", config.database_path().display());

    let engine = SyncManager::open(&config).await;
    if !engine.is_persistent() {
        warn!("Running in memory only, changes will not be saved");
    }

    let loaded = engine.load_book(None).await;
    let markers: usize = loaded.songs.iter().map(|s| s.markers.len()).sum();
    info!(
        "Book {}: {} songs, {} markers, {} tags",
        loaded.book_id.as_deref().unwrap_or("-"),
        loaded.songs.len(),
        markers,
        loaded.tags.names().count()
    );
    for warning in &loaded.warnings {
        warn!("{:?}", warning);
    }

    let settings = engine.load_settings().await;
    info!(
        "Settings: theme {:?}, skip times {:?}, marker adjustment {}s",
        settings.theme, settings.skip_times, settings.marker_time_adjustment
    );

    Ok(())
}
