use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{CycleOutcome, Dispatcher};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Runs cycles back to back with `delay` between the end of one cycle and the
/// start of the next, until `cancel_token` fires. A cycle in progress always
/// runs to completion.
pub async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    delay: Duration,
    cancel_token: CancellationToken,
) {
    log_info!("dispatch loop started (delay {:?})", delay);

    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        match dispatcher.run_cycle().await {
            CycleOutcome::Delivered(name) => log_debug!("cycle delivered {}", name),
            outcome => log_debug!("cycle finished: {outcome:?}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("dispatch loop shutting down");
}
