//! Runs the feed refresher on a schedule for as long as the server is up
use std::time::Duration;

use tokio::{
    select, spawn,
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{error, info, warn};

use super::{
    clock::Clock,
    feed_refresher::{Refresh, RefreshOutcome},
};

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Wait after a successful update
    pub refresh_interval: Duration,
    /// First wait after a failed refresh, doubled for every failure in a row
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// How long shutdown waits for the loop before aborting it
    pub shutdown_timeout: Duration,
}

/// Handle to the running refresh loop
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl RefreshHandle {
    /// Signals the loop to stop and waits for it.
    /// Returns false if it had to be aborted or had panicked.
    pub async fn shutdown(self) -> bool {
        // Err means the loop already exited
        _ = self.shutdown.send(true);

        let abort_handle = self.task.abort_handle();

        match timeout(self.shutdown_timeout, self.task).await {
            Ok(Ok(())) => {
                info!("Feed refresher shut down cleanly");
                true
            }
            Ok(Err(e)) => {
                error!("Feed refresher task failed: {e}");
                false
            }
            Err(_) => {
                warn!(
                    "Feed refresher didn't stop within {:?}, aborting it",
                    self.shutdown_timeout
                );
                abort_handle.abort();
                false
            }
        }
    }
}

/// Spawns the refresh loop onto the runtime
pub fn start<R: Refresh, C: Clock>(
    refresher: R,
    clock: C,
    config: SupervisorConfig,
) -> RefreshHandle {
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let shutdown_timeout = config.shutdown_timeout;

    let task = spawn(refresh_loop(refresher, clock, config, shutdown_receiver));

    RefreshHandle {
        shutdown: shutdown_sender,
        task,
        shutdown_timeout,
    }
}

async fn refresh_loop<R: Refresh, C: Clock>(
    refresher: R,
    clock: C,
    config: SupervisorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);

    loop {
        // Dropping an in-flight refresh rolls back its uncommitted transaction
        let result = select! {
            _ = shutdown.changed() => break,
            result = refresher.refresh() => result,
        };

        let wait = match result {
            Ok(RefreshOutcome::Skipped { next_update }) => {
                backoff.reset();
                (next_update - clock.now()).to_std().unwrap_or(Duration::ZERO)
            }
            Ok(RefreshOutcome::Updated { .. }) => {
                backoff.reset();
                config.refresh_interval
            }
            Err(e) => {
                let wait = backoff.next_wait();
                error!("Refreshing the feed failed, retrying in {:?}: {e}", wait);
                wait
            }
        };

        select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {}
        }
    }

    info!("Feed refresher received shutdown");
}

#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    fn next_wait(&mut self) -> Duration {
        let wait = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2),
        }
        .min(self.max);

        self.current = Some(wait);
        wait
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
