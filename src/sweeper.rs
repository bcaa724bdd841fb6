//! # Sweeper — Periodic Window Finalization and Achievement Sweeps
//!
//! The scheduler collaborator made concrete: a tokio interval loop that, for
//! every segment, announces any window whose period has ended and then runs
//! the top-finisher achievement sweep. Every step is idempotent (one-way
//! flag flips gate the irreversible parts), so overlapping ticks and
//! restarts are harmless.

use crate::api::AppState;
use crate::finalizer::SweepOutcome;
use crate::Segment;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// One finalize-and-sweep pass over every segment.
pub async fn sweep_once(state: &AppState) {
    let now = Utc::now();
    for segment in Segment::ALL {
        match state.engine.finalizer.finalize_due_windows(segment, now).await {
            Ok(finalized) if finalized > 0 => {
                state
                    .prom_metrics
                    .windows_finalized_total
                    .inc_by(finalized as u64);
            }
            Ok(_) => {}
            Err(e) => {
                error!(segment = %segment, error = %e, "window finalization failed");
                continue;
            }
        }

        match state.engine.finalizer.sweep_achievements(segment, now).await {
            Ok(SweepOutcome::Swept {
                champions, top_ten, ..
            }) => {
                info!(segment = %segment, champions, top_ten, "sweep granted badge progress");
            }
            Ok(_) => {}
            Err(e) => error!(segment = %segment, error = %e, "achievement sweep failed"),
        }
    }
}

/// Run the sweep on a fixed interval until the process exits.
pub async fn run_loop(state: Arc<AppState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(&state).await;
    }
}
