//! Cumulative volume delta module.
//!
//! Subscribes to the trade stream for every configured symbol and folds
//! each trade into a [`SymbolStateStore`]. Each cycle publishes the derived
//! metrics (buy ratio, delta, trend) and the feed's health.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use orderflow_core::{
    IndicatorModule, InitError, ModuleKind, ModuleStatus, PersistError, SharedClock, SymbolValues,
    TradeEvent, UpdateError,
};
use orderflow_data::{SnapshotPersistence, SnapshotRecord};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::collector::{FeedConnector, FeedHandle, FeedSupervisor, SupervisorConfig};
use crate::modules::runner::{apply_feed_state, FeedRunner};
use crate::modules::ModuleContext;
use crate::state_store::SymbolStateStore;

/// CVD indicator over a trade feed.
pub struct CvdModule<C: FeedConnector<Event = TradeEvent>> {
    name: String,
    cadence: Duration,
    symbols: Vec<String>,
    connector: Mutex<Option<C>>,
    supervisor_config: SupervisorConfig,
    clock: SharedClock,
    store: SymbolStateStore,
    persistence: SnapshotPersistence,
    runner: OnceLock<FeedRunner<C>>,
    status: RwLock<ModuleStatus>,
}

impl<C: FeedConnector<Event = TradeEvent>> CvdModule<C> {
    pub fn new(connector: C, ctx: &ModuleContext) -> Self {
        let name = ModuleKind::Cvd.as_str().to_string();
        let symbols = ctx.symbols();
        let supervisor_config =
            SupervisorConfig::new(&name, &symbols).with_feed_config(&ctx.config.feed);

        Self {
            cadence: ctx.cadence(ModuleKind::Cvd),
            symbols,
            connector: Mutex::new(Some(connector)),
            supervisor_config,
            clock: ctx.clock.clone(),
            store: SymbolStateStore::new(ctx.config.trend.to_trend_config()),
            persistence: ctx.persistence.clone(),
            runner: OnceLock::new(),
            status: RwLock::new(ModuleStatus::pending(&name)),
            name,
        }
    }

    /// Overrides the supervisor settings derived from the feed config.
    #[must_use]
    pub fn with_supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.supervisor_config = config;
        self
    }

    #[must_use]
    pub fn store(&self) -> &SymbolStateStore {
        &self.store
    }

    /// Feed handle, once initialised.
    #[must_use]
    pub fn feed(&self) -> Option<&FeedHandle> {
        self.runner.get().map(FeedRunner::handle)
    }

    /// Restarts a feed that went Down.
    pub async fn restart_feed(&self) -> bool {
        match self.runner.get() {
            Some(runner) => runner.restart().await,
            None => false,
        }
    }
}

#[async_trait]
impl<C: FeedConnector<Event = TradeEvent>> IndicatorModule for CvdModule<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn initialize(&self) -> Result<(), InitError> {
        if self.symbols.is_empty() {
            return Err(InitError::NoSymbols);
        }
        let connector = self
            .connector
            .lock()
            .take()
            .ok_or(InitError::AlreadyInitialized)?;

        let (supervisor, rx) =
            FeedSupervisor::new(connector, self.supervisor_config.clone(), self.clock.clone());
        let store = self.store.clone();
        let runner = FeedRunner::start(&self.name, supervisor, rx, move |trade: TradeEvent| {
            store.apply(&trade)
        });
        if self.runner.set(runner).is_err() {
            return Err(InitError::AlreadyInitialized);
        }

        info!(module = %self.name, symbols = ?self.symbols, "Module initialized");
        Ok(())
    }

    async fn update(&self) -> Result<(), UpdateError> {
        let runner = self.runner.get().ok_or(UpdateError::NotInitialized)?;
        let now = self.clock.now();

        let values: BTreeMap<String, SymbolValues> = self
            .symbols
            .iter()
            .map(|symbol| (symbol.clone(), SymbolValues::from(&self.store.metrics(symbol))))
            .collect();

        let mut status = self.status.write();
        status.per_symbol_values = values;
        let result = apply_feed_state(&mut status, runner, now);
        debug!(
            module = %self.name,
            health = status.health.as_str(),
            tracked = self.store.len(),
            "Cycle complete"
        );
        result
    }

    async fn save(&self) -> Result<(), PersistError> {
        let now = self.clock.now();
        let trend = *self.store.trend_config();

        let records: Vec<SnapshotRecord> = self
            .store
            .snapshot_all(now)
            .iter()
            .map(|snapshot| {
                let label = snapshot.state.trend(&trend).as_str().to_string();
                SnapshotRecord::from_snapshot(&self.name, snapshot, Some(label))
            })
            .collect();

        self.persistence.flush(&records).await
    }

    fn status(&self) -> ModuleStatus {
        self.status.read().clone()
    }

    async fn shutdown(&self) {
        if let Some(runner) = self.runner.get() {
            runner.stop().await;
        }
    }
}
