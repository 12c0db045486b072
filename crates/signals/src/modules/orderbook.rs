//! Order book imbalance module over the partial depth stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use orderflow_core::{
    DepthSnapshot, IndicatorModule, InitError, MalformedEventError, ModuleKind, ModuleStatus,
    PersistError, SharedClock, SymbolValues, UpdateError,
};
use orderflow_data::{SnapshotPersistence, SnapshotRecord};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::collector::{FeedConnector, FeedHandle, FeedSupervisor, SupervisorConfig};
use crate::modules::runner::{apply_feed_state, FeedRunner};
use crate::modules::ModuleContext;

/// Imbalance beyond which one side is considered dominant.
const IMBALANCE_THRESHOLD: Decimal = dec!(0.3);

type LatestBooks = Arc<RwLock<HashMap<String, DepthSnapshot>>>;

/// Derives imbalance, mid price and spread from one depth snapshot.
///
/// Imbalance is `(bid_volume - ask_volume) / (bid_volume + ask_volume)`, in
/// `[-1, 1]`, and zero for an empty book.
#[must_use]
pub fn book_values(book: &DepthSnapshot) -> SymbolValues {
    let bid_volume = book.bid_volume();
    let ask_volume = book.ask_volume();
    let total = bid_volume + ask_volume;
    let imbalance = if total > Decimal::ZERO {
        (bid_volume - ask_volume) / total
    } else {
        Decimal::ZERO
    };

    let signal = if imbalance > IMBALANCE_THRESHOLD {
        "bid_heavy"
    } else if imbalance < -IMBALANCE_THRESHOLD {
        "ask_heavy"
    } else {
        "balanced"
    };

    let mut values = SymbolValues::default()
        .with_metric("bid_volume", bid_volume)
        .with_metric("ask_volume", ask_volume)
        .with_metric("imbalance", imbalance.round_dp(6))
        .with_signal(signal);

    let best_bid = book.bids.first().map(|(price, _)| *price);
    let best_ask = book.asks.first().map(|(price, _)| *price);
    if let Some(bid) = best_bid {
        values = values.with_metric("best_bid", bid);
    }
    if let Some(ask) = best_ask {
        values = values.with_metric("best_ask", ask);
    }
    if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
        if bid > Decimal::ZERO && ask > Decimal::ZERO {
            let mid = (bid + ask) / Decimal::TWO;
            let spread_bps = (ask - bid) / mid * Decimal::from(10_000);
            values = values
                .with_metric("mid_price", mid)
                .with_metric("spread_bps", spread_bps.round_dp(4));
        }
    }
    values
}

fn validate_book(book: &DepthSnapshot) -> Result<(), MalformedEventError> {
    if book.bids.is_empty() && book.asks.is_empty() {
        return Err(MalformedEventError::Decode(format!(
            "empty depth snapshot for {}",
            book.symbol
        )));
    }
    let levels = book.bids.iter().chain(book.asks.iter());
    if let Some((price, _)) = levels.clone().find(|(price, _)| *price <= Decimal::ZERO) {
        return Err(MalformedEventError::InvalidPrice {
            symbol: book.symbol.clone(),
            price: price.to_string(),
        });
    }
    if levels.clone().any(|(_, qty)| *qty < Decimal::ZERO) {
        return Err(MalformedEventError::Decode(format!(
            "negative depth quantity for {}",
            book.symbol
        )));
    }
    Ok(())
}

/// Keeps the latest depth snapshot per symbol.
pub struct OrderBookModule<C: FeedConnector<Event = DepthSnapshot>> {
    name: String,
    cadence: Duration,
    symbols: Vec<String>,
    connector: Mutex<Option<C>>,
    supervisor_config: SupervisorConfig,
    clock: SharedClock,
    books: LatestBooks,
    persistence: SnapshotPersistence,
    runner: OnceLock<FeedRunner<C>>,
    status: RwLock<ModuleStatus>,
}

impl<C: FeedConnector<Event = DepthSnapshot>> OrderBookModule<C> {
    pub fn new(connector: C, ctx: &ModuleContext) -> Self {
        let name = ModuleKind::OrderBook.as_str().to_string();
        let symbols = ctx.symbols();

        Self {
            cadence: ctx.cadence(ModuleKind::OrderBook),
            supervisor_config: SupervisorConfig::new(&name, &symbols)
                .with_feed_config(&ctx.config.feed),
            symbols,
            connector: Mutex::new(Some(connector)),
            clock: ctx.clock.clone(),
            books: Arc::new(RwLock::new(HashMap::new())),
            persistence: ctx.persistence.clone(),
            runner: OnceLock::new(),
            status: RwLock::new(ModuleStatus::pending(&name)),
            name,
        }
    }

    #[must_use]
    pub fn with_supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.supervisor_config = config;
        self
    }

    /// Latest book for a symbol.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<DepthSnapshot> {
        self.books.read().get(symbol).cloned()
    }

    #[must_use]
    pub fn feed(&self) -> Option<&FeedHandle> {
        self.runner.get().map(FeedRunner::handle)
    }

    pub async fn restart_feed(&self) -> bool {
        match self.runner.get() {
            Some(runner) => runner.restart().await,
            None => false,
        }
    }
}

#[async_trait]
impl<C: FeedConnector<Event = DepthSnapshot>> IndicatorModule for OrderBookModule<C> {
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
        let books = Arc::clone(&self.books);
        let runner = FeedRunner::start(&self.name, supervisor, rx, move |book: DepthSnapshot| {
            validate_book(&book)?;
            books.write().insert(book.symbol.clone(), book);
            Ok(())
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

        let values: BTreeMap<String, SymbolValues> = {
            let books = self.books.read();
            books
                .iter()
                .map(|(symbol, book)| (symbol.clone(), book_values(book)))
                .collect()
        };

        let mut status = self.status.write();
        status.per_symbol_values = values;
        let result = apply_feed_state(&mut status, runner, now);
        debug!(
            module = %self.name,
            health = status.health.as_str(),
            books = status.per_symbol_values.len(),
            "Cycle complete"
        );
        result
    }

    async fn save(&self) -> Result<(), PersistError> {
        let now = self.clock.now();
        let mut records: Vec<SnapshotRecord> = {
            let books = self.books.read();
            books
                .values()
                .map(|book| {
                    SnapshotRecord::from_values(
                        &self.name,
                        &book.symbol,
                        now,
                        Some(book.timestamp),
                        &book_values(book),
                    )
                })
                .collect()
        };
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));

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
