use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::db::{Database, StoreResult};

/// Notified whenever the number of undelivered pictures may have changed.
/// Implementations must not block the caller.
pub trait UnsentCounter: Send + Sync {
    fn refresh(&self);
}

/// Publishes the unsent count on a watch channel for whoever renders it.
pub struct WatchUnsentCounter {
    db: Database,
    tx: Arc<watch::Sender<u64>>,
}

impl WatchUnsentCounter {
    pub fn new(db: Database) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            db,
            tx: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Recount and publish, waiting for the result.
    pub async fn refresh_now(&self) -> StoreResult<u64> {
        let count = self.db.count_unsent().await?;
        self.tx.send_replace(count);
        Ok(count)
    }
}

impl UnsentCounter for WatchUnsentCounter {
    fn refresh(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("unsent counter refresh requested outside the runtime");
            return;
        };

        let db = self.db.clone();
        let tx = Arc::clone(&self.tx);
        runtime.spawn(async move {
            match db.count_unsent().await {
                Ok(count) => {
                    tx.send_replace(count);
                    debug!("{count} unsent image(s)");
                }
                Err(err) => warn!("failed to refresh unsent counter: {err}"),
            }
        });
    }
}
