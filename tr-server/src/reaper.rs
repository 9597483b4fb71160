//! Empty room reclamation

use crate::state::RelayState;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Sweep empty rooms every `sweep_interval` until cancelled
pub async fn run(state: RelayState, cancel: CancellationToken) {
    let mut ticker = interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    info!(
        "Room reaper started (every {:?}, retention {:?})",
        state.config.sweep_interval, state.config.room_retention
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = state.sweep(Instant::now()).await;
                if removed > 0 {
                    info!("Reclaimed {} empty rooms", removed);
                }
            }
        }
    }
    info!("Room reaper stopped");
}
