//! Background dispatch trigger.
//!
//! Polls on a fixed interval and runs one dispatch cycle per tick until
//! the shutdown channel flips.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::CycleOutcome;

use super::dispatcher::BatchDispatcher;

/// Tuning for the dispatch trigger loop
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Time between cycle attempts
    pub poll_interval: Duration,
    pub enabled: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            enabled: true,
        }
    }
}

/// Spawn the dispatch trigger as a background task.
///
/// Returns the task handle and a shutdown sender; send `true` to stop the
/// loop after the in-flight cycle finishes.
pub fn spawn_dispatcher(
    dispatcher: Arc<BatchDispatcher>,
    config: TriggerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !config.enabled {
            info!("Dispatch trigger disabled");
            return;
        }

        info!(
            poll_interval_secs = config.poll_interval.as_secs(),
            "Dispatch trigger started"
        );

        let mut interval = tokio::time::interval(config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match dispatcher.run_cycle().await {
                        Ok(CycleOutcome::Skipped { .. }) => {}
                        Ok(CycleOutcome::Completed { submitted, user_ops_sent, errored, cancelled }) => {
                            info!(
                                submitted,
                                user_ops_sent,
                                errored,
                                cancelled,
                                "Dispatch cycle finished"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Dispatch cycle failed");
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Dispatch trigger shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
