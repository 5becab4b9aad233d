//! Registration of newly captured pictures.
//!
//! Pictures are written to the pictures directory under a fresh unique name
//! and then recorded as eligible for delivery.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use log::{info, warn};
use uuid::Uuid;

use crate::{
    counter::UnsentCounter,
    db::{Database, ImageRecord, StoreError},
    pictures::LocalPictureStore,
};

pub struct CaptureIngest {
    db: Database,
    pictures: Arc<LocalPictureStore>,
    counter: Arc<dyn UnsentCounter>,
}

impl CaptureIngest {
    pub fn new(
        db: Database,
        pictures: Arc<LocalPictureStore>,
        counter: Arc<dyn UnsentCounter>,
    ) -> Self {
        Self {
            db,
            pictures,
            counter,
        }
    }

    /// Stores encoded picture bytes and queues them for upload.
    pub async fn ingest(&self, bytes: &[u8]) -> Result<ImageRecord> {
        let format = image::guess_format(bytes).context("unrecognised picture data")?;
        let extension = extension_for(format)?;
        let name = format!("{}.{}", Uuid::new_v4(), extension);

        self.pictures
            .write(&name, bytes)
            .await
            .with_context(|| format!("failed to write {name}"))?;
        let stat = self.pictures.stat(&name).await?;
        let record = self
            .db
            .create_image(&name, stat.size_kb, stat.created_at)
            .await?;

        info!("Captured {} ({:.1} kB)", record.name, record.size_kb);
        self.counter.refresh();
        Ok(record)
    }

    /// Records pictures already on disk that have no row yet. Returns how
    /// many were added.
    pub async fn backfill(&self) -> Result<usize> {
        let names = self.pictures.list().await?;
        let mut registered = 0;

        for name in names {
            if self.db.get_image(&name).await?.is_some() {
                continue;
            }
            let stat = match self.pictures.stat(&name).await {
                Ok(stat) => stat,
                Err(err) => {
                    warn!("Skipping {name} during backfill: {err}");
                    continue;
                }
            };
            match self
                .db
                .create_image(&name, stat.size_kb, stat.created_at)
                .await
            {
                Ok(_) => registered += 1,
                Err(StoreError::AlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if registered > 0 {
            info!("Registered {registered} untracked picture(s)");
            self.counter.refresh();
        }
        Ok(registered)
    }
}

fn extension_for(format: ImageFormat) -> Result<&'static str> {
    match format {
        ImageFormat::Jpeg => Ok("jpg"),
        ImageFormat::Png => Ok("png"),
        other => bail!("unsupported picture format {other:?}"),
    }
}
