//! Background tasks behind a stream-backed module.
//!
//! Two tasks per module: the feed supervisor, and an applier that drains
//! the dispatch channel into the module's state. The applier is the only
//! writer of that state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use orderflow_core::{FeedState, Health, MalformedEventError, ModuleStatus, UpdateError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collector::{FeedConnector, FeedHandle, FeedStats, FeedSupervisor};
use crate::common::should_log_occurrence;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct FeedRunner<C: FeedConnector> {
    name: String,
    handle: FeedHandle,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<FeedSupervisor<C>>>>,
    applier: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<C: FeedConnector> FeedRunner<C> {
    /// Spawns the applier and the supervisor.
    pub(crate) fn start<F>(
        name: &str,
        supervisor: FeedSupervisor<C>,
        mut rx: mpsc::Receiver<C::Event>,
        mut apply: F,
    ) -> Self
    where
        F: FnMut(C::Event) -> Result<(), MalformedEventError> + Send + 'static,
    {
        let handle = supervisor.handle();

        let applier_handle = handle.clone();
        let applier_name = name.to_string();
        let applier = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = apply(event) {
                    let malformed = applier_handle.counters().record_malformed();
                    if should_log_occurrence(malformed) {
                        warn!(module = %applier_name, malformed, error = %e, "Rejected event");
                    }
                }
            }
        });

        Self {
            name: name.to_string(),
            handle,
            supervisor: tokio::sync::Mutex::new(Some(spawn_supervisor(supervisor))),
            applier: parking_lot::Mutex::new(Some(applier)),
        }
    }

    pub(crate) fn handle(&self) -> &FeedHandle {
        &self.handle
    }

    /// True while the applier task is still draining events.
    pub(crate) fn applier_running(&self) -> bool {
        self.applier
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Restarts a supervisor that went Down. Returns false if it was not Down.
    pub(crate) async fn restart(&self) -> bool {
        let mut slot = self.supervisor.lock().await;
        let finished = slot.as_ref().is_some_and(JoinHandle::is_finished);
        if !finished || !self.handle.state().is_down() {
            return false;
        }
        let Some(task) = slot.take() else {
            return false;
        };

        match task.await {
            Ok(supervisor) => {
                self.handle.reset();
                info!(module = %self.name, "Restarting feed after manual reset");
                *slot = Some(spawn_supervisor(supervisor));
                true
            }
            Err(e) => {
                warn!(module = %self.name, error = %e, "Feed supervisor task failed");
                false
            }
        }
    }

    /// Stops both tasks, aborting either one that overruns the timeout.
    pub(crate) async fn stop(&self) {
        self.handle.stop();

        if let Some(mut task) = self.supervisor.lock().await.take() {
            // Dropping the returned supervisor closes the dispatch channel
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                warn!(module = %self.name, "Feed supervisor did not stop in time, aborting");
                task.abort();
            }
        }

        let applier = self.applier.lock().take();
        if let Some(mut applier) = applier {
            if tokio::time::timeout(STOP_TIMEOUT, &mut applier).await.is_err() {
                applier.abort();
            }
        }
    }
}

fn spawn_supervisor<C: FeedConnector>(
    mut supervisor: FeedSupervisor<C>,
) -> JoinHandle<FeedSupervisor<C>> {
    tokio::spawn(async move {
        supervisor.run().await;
        supervisor
    })
}

/// Applies feed state to a module status after one cycle.
///
/// A connected feed forgives earlier restarts and marks the cycle healthy.
/// A Down feed fails the cycle, as does an applier that exited without a
/// stop being requested. Its exit closes the dispatch channel, so the feed
/// may already report Stopped by then.
pub(crate) fn apply_feed_state<C: FeedConnector>(
    status: &mut ModuleStatus,
    runner: &FeedRunner<C>,
    now: DateTime<Utc>,
) -> Result<(), UpdateError> {
    let handle = runner.handle();
    let state = handle.state();
    let result = if !handle.is_stopped() && !runner.applier_running() {
        let err = UpdateError::ApplierStopped;
        status.health = Health::Down;
        status.last_error = Some(err.to_string());
        Err(err)
    } else {
        feed_health(status, handle, state, now)
    };

    status.counters = feed_counters(&handle.stats(), handle.restart_state().restart_count);
    result
}

fn feed_health(
    status: &mut ModuleStatus,
    handle: &FeedHandle,
    state: FeedState,
    now: DateTime<Utc>,
) -> Result<(), UpdateError> {
    match state {
        FeedState::Connected => {
            handle.record_healthy_cycle();
            status.health = Health::Healthy;
            status.last_update_time = Some(now);
            status.last_error = None;
            Ok(())
        }
        FeedState::Down => {
            let restarts = handle.restart_state().restart_count;
            let err = UpdateError::FeedDown { restarts };
            status.health = Health::Down;
            status.last_error = Some(err.to_string());
            Err(err)
        }
        FeedState::Reconnecting { attempt, .. } => {
            status.health = Health::Degraded;
            status.last_error = Some(format!("feed reconnecting (attempt {attempt})"));
            Ok(())
        }
        FeedState::Idle | FeedState::Connecting => {
            status.health = Health::Degraded;
            status.last_error = Some("feed connecting".to_string());
            Ok(())
        }
        FeedState::Stopped => {
            status.health = Health::Degraded;
            status.last_error = Some("feed stopped".to_string());
            Ok(())
        }
    }
}

fn feed_counters(stats: &FeedStats, restarts: u32) -> std::collections::BTreeMap<String, u64> {
    [
        ("received", stats.received),
        ("dropped", stats.dropped),
        ("malformed", stats.malformed),
        ("connects", stats.connects),
        ("restarts", u64::from(restarts)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
