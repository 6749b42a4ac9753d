//! Periodic pass scheduling.
//!
//! A single task alternates between waiting and running a pass. The next
//! wait only starts after the previous pass returns, so two passes can never
//! share the browser. Stopping cancels the wait, never a running pass.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::ScheduleSettings;
use crate::models::ExtractionResult;
use crate::pipeline::PassRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SchedulerState>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduling loop on the current runtime.
    pub fn start<R: PassRunner>(runner: Arc<R>, settings: ScheduleSettings) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);

        info!(
            "Scraping scheduler started (every {:?}, run on start: {})",
            settings.interval, settings.run_on_start
        );
        let handle = tokio::spawn(run_loop(runner, settings, stop_rx, state_tx));

        Self {
            stop_tx,
            state_rx,
            handle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Stop scheduling. A pass already running is allowed to finish; this
    /// returns once it has.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
        info!("Scraping scheduler stopped");
    }
}

async fn run_loop<R: PassRunner>(
    runner: Arc<R>,
    settings: ScheduleSettings,
    mut stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SchedulerState>,
) {
    let mut wait = if settings.run_on_start {
        Duration::ZERO
    } else {
        settings.interval
    };

    loop {
        tokio::select! {
            _ = sleep(wait) => {}
            // Fires on a stop request or when the handle is dropped.
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }
        wait = settings.interval;

        state_tx.send_replace(SchedulerState::Running);

        // Run on its own task so a panic inside the pass stays a logged error.
        let pass_runner = Arc::clone(&runner);
        match tokio::spawn(async move { pass_runner.run_pass().await }).await {
            Ok(Ok(results)) => log_pass(&results),
            Ok(Err(e)) => error!("Scraping pass aborted: {}", e),
            Err(e) => error!("Scraping pass panicked: {}", e),
        }

        state_tx.send_replace(SchedulerState::Idle);
    }
}

fn log_pass(results: &[ExtractionResult]) {
    let scraped: usize = results.iter().map(|r| r.raw_count).sum();
    let saved: usize = results.iter().map(|r| r.saved_count).sum();
    let errors: usize = results.iter().map(|r| r.errors.len()).sum();
    let failed = results.iter().filter(|r| r.failure.is_some()).count();
    info!(
        "Scraping pass complete: {} sources ({} failed), scraped {}, saved {}, errors {}",
        results.len(),
        failed,
        scraped,
        saved,
        errors
    );
}
