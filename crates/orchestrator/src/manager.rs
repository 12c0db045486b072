//! Indicator manager.
//!
//! Drives every configured module on its own cadence as an independent task,
//! plus one persistence task that calls `save()` on a fixed timer. Failures
//! and panics are contained at the cycle boundary; the aggregated status map
//! is the only state the manager shares between tasks.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use orderflow_core::{
    ConfigError, IndicatorModule, InitError, ModuleStatus, SharedClock, Shutdown, ShutdownToken,
    UpdateError,
};
use orderflow_signals::{ModuleContext, ModuleRegistry};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::status::{StatusMap, StatusReport};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// A module plus whether its `initialize()` has succeeded.
#[derive(Clone)]
struct ManagedModule {
    module: Arc<dyn IndicatorModule>,
    initialized: Arc<AtomicBool>,
}

impl ManagedModule {
    fn new(module: Arc<dyn IndicatorModule>) -> Self {
        Self {
            module,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    fn name(&self) -> &str {
        self.module.name()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Runs `initialize()` unless it already succeeded.
    async fn ensure_initialized(&self) -> Result<(), InitError> {
        if self.is_initialized() {
            return Ok(());
        }
        match AssertUnwindSafe(self.module.initialize()).catch_unwind().await {
            Ok(Ok(())) | Ok(Err(InitError::AlreadyInitialized)) => {
                self.initialized.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(InitError::Upstream(format!(
                "initialize panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn update(&self) -> Result<(), UpdateError> {
        match AssertUnwindSafe(self.module.update()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(UpdateError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one cycle for a module and publishes the outcome.
///
/// Returns whether the cycle succeeded.
async fn run_cycle(managed: &ManagedModule, statuses: &StatusMap) -> bool {
    let name = managed.name();

    if let Err(e) = managed.ensure_initialized().await {
        warn!(module = %name, error = %e, "Initialize failed, retrying next cycle");
        statuses.publish(managed.module.status().degraded(format!("initialize failed: {e}")));
        return false;
    }

    match managed.update().await {
        Ok(()) => {
            statuses.publish(managed.module.status());
            true
        }
        Err(e) => {
            if matches!(e, UpdateError::FeedDown { .. } | UpdateError::ApplierStopped) {
                error!(module = %name, error = %e, "Module down");
            } else {
                warn!(module = %name, error = %e, "Update failed");
            }
            statuses.publish(managed.module.status().degraded(e.to_string()));
            false
        }
    }
}

/// Calls `save()` on every initialised module; failures are logged only.
async fn flush_all(modules: &[ManagedModule]) -> usize {
    let results = join_all(
        modules
            .iter()
            .filter(|m| m.is_initialized())
            .map(|m| async move {
                let result = AssertUnwindSafe(m.module.save()).catch_unwind().await;
                (m.name().to_string(), result)
            }),
    )
    .await;

    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(Ok(())) => debug!(module = %name, "Snapshot flushed"),
            Ok(Err(e)) => {
                failed += 1;
                error!(module = %name, error = %e, "Snapshot flush failed");
            }
            Err(panic) => {
                failed += 1;
                error!(module = %name, panic = %panic_message(panic.as_ref()), "Snapshot flush panicked");
            }
        }
    }
    failed
}

fn log_status_summary(statuses: &StatusMap, now: DateTime<Utc>) {
    for status in statuses.snapshot().values() {
        info!(
            module = %status.module_name,
            health = status.health.as_str(),
            symbols = status.per_symbol_values.len(),
            age_secs = ?status.age(now).map(|a| a.as_secs()),
            last_error = ?status.last_error,
            "Module status"
        );
    }
}

async fn module_loop(
    managed: ManagedModule,
    statuses: StatusMap,
    clock: SharedClock,
    mut token: ShutdownToken,
) {
    let cadence = managed.module.cadence();
    info!(module = %managed.name(), cadence = ?cadence, "Module loop started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = clock.sleep(cadence) => {}
        }
        tokio::select! {
            () = token.cancelled() => break,
            _ = run_cycle(&managed, &statuses) => {}
        }
    }

    info!(module = %managed.name(), "Module loop stopped");
}

async fn persistence_loop(
    modules: Vec<ManagedModule>,
    statuses: StatusMap,
    clock: SharedClock,
    interval: Duration,
    mut token: ShutdownToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = clock.sleep(interval) => {}
        }
        let failed = flush_all(&modules).await;
        if failed > 0 {
            warn!(failed, "Flush cycle had failures");
        }
        log_status_summary(&statuses, clock.now());
    }
}

/// Owns the configured modules and their loops.
pub struct IndicatorManager {
    modules: Vec<ManagedModule>,
    statuses: StatusMap,
    clock: SharedClock,
    flush_interval: Duration,
    shutdown: Shutdown,
}

impl IndicatorManager {
    /// Builds every configured module through the default registry.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid config or an unknown module name.
    pub fn new(context: ModuleContext) -> Result<Self, ConfigError> {
        Self::with_registry(context, &ModuleRegistry::with_defaults())
    }

    /// Builds every configured module through `registry`.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid config or an unknown module name.
    pub fn with_registry(
        context: ModuleContext,
        registry: &ModuleRegistry,
    ) -> Result<Self, ConfigError> {
        context.config.validate()?;
        let modules = registry.build_all(&context)?;
        Ok(Self::from_modules(
            modules,
            context.clock.clone(),
            context.config.persistence.flush_interval(),
        ))
    }

    /// Wraps already-constructed modules.
    #[must_use]
    pub fn from_modules(
        modules: Vec<Arc<dyn IndicatorModule>>,
        clock: SharedClock,
        flush_interval: Duration,
    ) -> Self {
        let statuses = StatusMap::new();
        for module in &modules {
            statuses.publish(ModuleStatus::pending(module.name()));
        }

        Self {
            modules: modules.into_iter().map(ManagedModule::new).collect(),
            statuses,
            clock,
            flush_interval,
            shutdown: Shutdown::new(),
        }
    }

    /// Module names in configuration order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// Initialises each module and runs one update, concurrently.
    ///
    /// A failing module is marked Degraded and retried by its loop later;
    /// the manager still starts. Returns true if every module passed.
    pub async fn run_startup_tests(&self) -> bool {
        info!(modules = self.modules.len(), "Running startup self-tests");

        let results = join_all(self.modules.iter().map(|managed| async move {
            let passed = match tokio::time::timeout(
                STARTUP_TIMEOUT,
                run_cycle(managed, &self.statuses),
            )
            .await
            {
                Ok(passed) => passed,
                Err(_) => {
                    self.statuses.publish(
                        managed
                            .module
                            .status()
                            .degraded(format!("self-test timed out after {STARTUP_TIMEOUT:?}")),
                    );
                    false
                }
            };
            (managed.name().to_string(), passed)
        }))
        .await;

        let mut all_passed = true;
        for (name, passed) in results {
            if passed {
                info!(module = %name, "Self-test passed");
            } else {
                all_passed = false;
                warn!(module = %name, "Self-test failed, module starts degraded");
            }
        }
        all_passed
    }

    /// Drives all module loops and the persistence timer until [`stop`].
    ///
    /// On shutdown runs a final flush and releases every module.
    ///
    /// [`stop`]: Self::stop
    pub async fn run(&self) {
        let mut tasks: Vec<(String, JoinHandle<()>)> = self
            .modules
            .iter()
            .map(|managed| {
                let task = tokio::spawn(module_loop(
                    managed.clone(),
                    self.statuses.clone(),
                    self.clock.clone(),
                    self.shutdown.token(),
                ));
                (managed.name().to_string(), task)
            })
            .collect();
        tasks.push((
            "persistence".to_string(),
            tokio::spawn(persistence_loop(
                self.modules.clone(),
                self.statuses.clone(),
                self.clock.clone(),
                self.flush_interval,
                self.shutdown.token(),
            )),
        ));
        info!(units = tasks.len(), "Indicator manager running");

        let mut token = self.shutdown.token();
        token.cancelled().await;
        info!("Shutdown requested, stopping units");

        for (name, mut task) in tasks {
            if tokio::time::timeout(JOIN_TIMEOUT, &mut task).await.is_err() {
                warn!(unit = %name, "Unit did not stop in time, aborting");
                task.abort();
            }
        }

        let failed = flush_all(&self.modules).await;
        info!(failed, "Final flush complete");

        join_all(self.modules.iter().map(|m| m.module.shutdown())).await;
        info!("Indicator manager stopped");
    }

    /// Requests shutdown; `run()` returns once every unit has exited.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Handle that can stop the manager from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Copy of the last status of every module.
    #[must_use]
    pub fn status(&self) -> BTreeMap<String, ModuleStatus> {
        self.statuses.snapshot()
    }

    #[must_use]
    pub fn status_report(&self, now: DateTime<Utc>) -> StatusReport {
        StatusReport::build(&self.statuses.snapshot(), now)
    }

    /// Flushes every initialised module now; returns the failure count.
    pub async fn flush(&self) -> usize {
        flush_all(&self.modules).await
    }
}
