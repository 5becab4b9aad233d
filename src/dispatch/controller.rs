use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{loop_worker::dispatch_loop, Dispatcher};

/// Owns the background dispatch task.
pub struct DispatchController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl DispatchController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, dispatcher: Arc<Dispatcher>, delay: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("dispatch loop already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(dispatcher, delay, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Dispatch loop scheduled");
        Ok(())
    }

    /// Cancels the loop and waits for the current cycle to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("dispatch loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for DispatchController {
    fn default() -> Self {
        Self::new()
    }
}
