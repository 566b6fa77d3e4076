//! Background JWKS refresh task.
//!
//! Periodically refetches the key set so that rotated keys are picked up
//! before the first token signed with them arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::jwks::JwksCache;

/// Spawn a background task that refreshes the JWKS cache on a fixed period.
///
/// Returns a `JoinHandle` that can be used to abort the task. Aborting never
/// interrupts a key set swap, which happens without yielding.
pub fn spawn_refresh_task(
    jwks: Arc<JwksCache>,
    refresh_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick, the cache was filled on construction
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match jwks.refresh().await {
                Ok(()) => {
                    debug!(
                        key_count = jwks.snapshot().len(),
                        "Periodic JWKS refresh completed"
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %jwks.jwks_url(),
                        "Periodic JWKS refresh failed, keeping previous key set"
                    );
                }
            }
        }
    })
}
