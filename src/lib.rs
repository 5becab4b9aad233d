pub mod capture;
pub mod counter;
pub mod db;
pub mod dispatch;
pub mod network;
pub mod pictures;
pub mod session;
pub mod settings;
pub mod transfer;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use capture::CaptureIngest;
use counter::WatchUnsentCounter;
use db::{Database, ImageStatus};
use dispatch::{DispatchController, Dispatcher};
use network::SystemNetworkStatus;
use pictures::LocalPictureStore;
use session::{PreferencesStore, SessionGate};
use settings::Settings;
use transfer::HttpUploader;

/// Entry point of the daemon: wires the store, the session gate and the
/// uploader together and runs the dispatch loop until Ctrl-C.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("photo-courier starting up...");

    let settings = Settings::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(serve(settings))
}

pub async fn serve(settings: Settings) -> Result<()> {
    let database = Database::new(settings.database_path())?;

    // Leases left behind by a crash keep their record out of selection.
    let stale = database.list_leased().await?;
    for image in &stale {
        warn!(
            "Image {} ({}) is still leased from a previous run; it will not be retried",
            image.name,
            image.remote_status().map_or("unknown", ImageStatus::as_str)
        );
    }

    let preferences = Arc::new(PreferencesStore::new(settings.preferences_path())?);
    let pictures = Arc::new(LocalPictureStore::new(settings.pictures_dir()));
    let counter = Arc::new(WatchUnsentCounter::new(database.clone()));

    let ingest = CaptureIngest::new(database.clone(), pictures.clone(), counter.clone());
    if let Err(err) = ingest.backfill().await {
        warn!("Failed to register untracked pictures: {err:?}");
    }
    let unsent = counter.refresh_now().await?;
    info!("{unsent} unsent image(s) queued");

    let gate = SessionGate::new(preferences.clone(), Arc::new(SystemNetworkStatus::new()));
    let uploader = Arc::new(HttpUploader::new(
        preferences.clone(),
        pictures.clone(),
        settings.upload_endpoint.clone(),
        settings.request_timeout(),
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        database.clone(),
        gate,
        pictures,
        uploader,
        counter,
        settings.presence_timeout(),
    ));

    let mut controller = DispatchController::new();
    controller.start(dispatcher, settings.cycle_delay())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    controller.stop().await?;
    database.close();
    info!("Closed image store at {}", database.path().display());
    Ok(())
}
