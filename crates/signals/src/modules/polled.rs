//! Poll-based modules over the metadata REST endpoints.
//!
//! One [`PolledModule`] type serves open interest, funding and liquidations.
//! Each cycle polls every symbol concurrently; every request holds one
//! permit from the shared [`OutboundRateLimiter`]. A cycle fails only when
//! every request fails; partial failures degrade the module and keep the
//! last good values for the failed symbols.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use orderflow_core::{
    Health, IndicatorModule, InitError, ModuleKind, ModuleStatus, PersistError, SharedClock,
    SymbolValues, UpdateError,
};
use orderflow_data::{SnapshotPersistence, SnapshotRecord};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::metadata::{ForceOrder, LiquidationSide, MetadataClient, OpenInterest, PremiumIndex};
use crate::modules::ModuleContext;
use crate::rate_limiter::OutboundRateLimiter;

/// Funding rates within this band of zero are reported as neutral.
const FUNDING_NEUTRAL_BAND: Decimal = dec!(0.0001);
/// Funding settles three times a day.
const FUNDING_PERIODS_PER_YEAR: Decimal = dec!(1095);
/// Open interest moves under this percentage are reported as flat.
const OI_FLAT_BAND_PCT: Decimal = dec!(0.1);

/// Which metadata endpoint a polled module reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolledVariant {
    OpenInterest,
    Funding,
    Liquidations,
}

impl PolledVariant {
    #[must_use]
    pub const fn kind(self) -> ModuleKind {
        match self {
            Self::OpenInterest => ModuleKind::OpenInterest,
            Self::Funding => ModuleKind::Funding,
            Self::Liquidations => ModuleKind::Liquidations,
        }
    }

    /// Maps a module kind to its polled variant; stream kinds have none.
    #[must_use]
    pub const fn from_kind(kind: ModuleKind) -> Option<Self> {
        match kind {
            ModuleKind::OpenInterest => Some(Self::OpenInterest),
            ModuleKind::Funding => Some(Self::Funding),
            ModuleKind::Liquidations => Some(Self::Liquidations),
            ModuleKind::Cvd | ModuleKind::OrderBook => None,
        }
    }
}

/// Cross-cycle memory: previous open interest and liquidation cursors.
#[derive(Debug, Default)]
struct PollState {
    previous_oi: HashMap<String, Decimal>,
    liquidation_cursor: HashMap<String, LiquidationCursor>,
}

/// Newest liquidation time already reported, plus the orders reported at
/// exactly that time. Upstream timestamps have millisecond resolution, so
/// later orders can share the cursor's millisecond.
#[derive(Debug, Clone)]
struct LiquidationCursor {
    time: DateTime<Utc>,
    seen_at_time: Vec<ForceOrder>,
}

impl LiquidationCursor {
    fn starting_at(time: DateTime<Utc>) -> Self {
        Self {
            time,
            seen_at_time: Vec::new(),
        }
    }

    /// Orders not yet reported, assuming `orders` starts at `self.time` inclusive.
    fn take_fresh(&self, orders: Vec<ForceOrder>) -> Vec<ForceOrder> {
        let mut seen = self.seen_at_time.clone();
        orders
            .into_iter()
            .filter(|order| {
                if order.time > self.time {
                    return true;
                }
                if order.time < self.time {
                    return false;
                }
                match seen.iter().position(|s| s == order) {
                    Some(i) => {
                        seen.swap_remove(i);
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    fn advance(&mut self, fresh: &[ForceOrder]) {
        let Some(newest) = fresh.iter().map(|o| o.time).max() else {
            return;
        };
        if newest > self.time {
            self.time = newest;
            self.seen_at_time.clear();
        }
        self.seen_at_time
            .extend(fresh.iter().filter(|o| o.time == newest).cloned());
    }
}

#[derive(Debug, Clone)]
struct Sample {
    observed_at: DateTime<Utc>,
    values: SymbolValues,
}

/// Metadata-backed indicator.
pub struct PolledModule {
    variant: PolledVariant,
    name: String,
    cadence: Duration,
    symbols: Vec<String>,
    limiter: OutboundRateLimiter,
    metadata: Arc<dyn MetadataClient>,
    clock: SharedClock,
    persistence: SnapshotPersistence,
    initialized: AtomicBool,
    poll: Mutex<PollState>,
    latest: RwLock<BTreeMap<String, Sample>>,
    status: RwLock<ModuleStatus>,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl PolledModule {
    pub fn new(variant: PolledVariant, ctx: &ModuleContext) -> Self {
        let kind = variant.kind();
        let name = kind.as_str().to_string();

        Self {
            variant,
            cadence: ctx.cadence(kind),
            symbols: ctx.symbols(),
            limiter: ctx.limiter.clone(),
            metadata: Arc::clone(&ctx.metadata),
            clock: ctx.clock.clone(),
            persistence: ctx.persistence.clone(),
            initialized: AtomicBool::new(false),
            poll: Mutex::new(PollState::default()),
            latest: RwLock::new(BTreeMap::new()),
            status: RwLock::new(ModuleStatus::pending(&name)),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            name,
        }
    }

    #[must_use]
    pub fn variant(&self) -> PolledVariant {
        self.variant
    }

    /// One request for one symbol, holding a rate permit for its duration.
    async fn poll_symbol(&self, symbol: &str, now: DateTime<Utc>) -> Result<Sample, String> {
        let _permit = self.limiter.acquire().await.map_err(|e| e.to_string())?;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let values = match self.variant {
            PolledVariant::OpenInterest => {
                let oi = self
                    .metadata
                    .open_interest(symbol)
                    .await
                    .map_err(|e| e.to_string())?;
                let previous = self
                    .poll
                    .lock()
                    .previous_oi
                    .insert(symbol.to_string(), oi.open_interest);
                open_interest_values(&oi, previous)
            }
            PolledVariant::Funding => {
                let premium = self
                    .metadata
                    .premium_index(symbol)
                    .await
                    .map_err(|e| e.to_string())?;
                funding_values(&premium)
            }
            PolledVariant::Liquidations => {
                let mut cursor = self.liquidation_cursor(symbol, now);
                let orders = self
                    .metadata
                    .force_orders(symbol, Some(cursor.time))
                    .await
                    .map_err(|e| e.to_string())?;
                let fresh = cursor.take_fresh(orders);
                cursor.advance(&fresh);
                self.poll
                    .lock()
                    .liquidation_cursor
                    .insert(symbol.to_string(), cursor);
                liquidation_values(&fresh)
            }
        };

        Ok(Sample {
            observed_at: now,
            values,
        })
    }

    /// Where the next liquidation query starts.
    ///
    /// The first poll looks back one cadence.
    fn liquidation_cursor(&self, symbol: &str, now: DateTime<Utc>) -> LiquidationCursor {
        if let Some(cursor) = self.poll.lock().liquidation_cursor.get(symbol) {
            return cursor.clone();
        }
        let lookback =
            chrono::Duration::from_std(self.cadence).unwrap_or_else(|_| chrono::Duration::minutes(1));
        LiquidationCursor::starting_at(now - lookback)
    }

    /// Cheap request against the first symbol to prove the endpoint answers.
    async fn check_endpoint(&self, symbol: &str) -> Result<(), String> {
        let _permit = self.limiter.acquire().await.map_err(|e| e.to_string())?;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let result = match self.variant {
            PolledVariant::OpenInterest => self.metadata.open_interest(symbol).await.map(|_| ()),
            PolledVariant::Funding => self.metadata.premium_index(symbol).await.map(|_| ()),
            PolledVariant::Liquidations => self
                .metadata
                .force_orders(symbol, Some(self.clock.now()))
                .await
                .map(|_| ()),
        };
        result.map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            e.to_string()
        })
    }

    fn counters(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("requests".to_string(), self.requests.load(Ordering::Relaxed)),
            ("failures".to_string(), self.failures.load(Ordering::Relaxed)),
        ])
    }
}

fn open_interest_values(oi: &OpenInterest, previous: Option<Decimal>) -> SymbolValues {
    let change = previous.map_or(Decimal::ZERO, |prev| oi.open_interest - prev);
    let change_pct = match previous {
        Some(prev) if prev > Decimal::ZERO => (change / prev * Decimal::ONE_HUNDRED).round_dp(4),
        _ => Decimal::ZERO,
    };
    let signal = if change_pct > OI_FLAT_BAND_PCT {
        "rising"
    } else if change_pct < -OI_FLAT_BAND_PCT {
        "falling"
    } else {
        "flat"
    };

    SymbolValues::default()
        .with_metric("open_interest", oi.open_interest)
        .with_metric("oi_change", change)
        .with_metric("oi_change_pct", change_pct)
        .with_signal(signal)
}

fn funding_values(premium: &PremiumIndex) -> SymbolValues {
    let rate = premium.last_funding_rate;
    let signal = if rate > FUNDING_NEUTRAL_BAND {
        "longs_pay"
    } else if rate < -FUNDING_NEUTRAL_BAND {
        "shorts_pay"
    } else {
        "neutral"
    };

    SymbolValues::default()
        .with_metric("funding_rate", rate)
        .with_metric(
            "funding_rate_annualized_pct",
            rate * FUNDING_PERIODS_PER_YEAR * Decimal::ONE_HUNDRED,
        )
        .with_metric("mark_price", premium.mark_price)
        .with_signal(signal)
}

fn liquidation_values(orders: &[ForceOrder]) -> SymbolValues {
    let (long_usd, short_usd) =
        orders
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(long, short), o| match o.side {
                LiquidationSide::Long => (long + o.notional(), short),
                LiquidationSide::Short => (long, short + o.notional()),
            });

    let signal = if orders.is_empty() {
        "quiet"
    } else if long_usd > short_usd {
        "longs_liquidated"
    } else if short_usd > long_usd {
        "shorts_liquidated"
    } else {
        "mixed"
    };

    SymbolValues::default()
        .with_metric("long_liquidated_usd", long_usd)
        .with_metric("short_liquidated_usd", short_usd)
        .with_metric("net_delta", long_usd - short_usd)
        .with_metric("count", Decimal::from(orders.len()))
        .with_signal(signal)
}

#[async_trait]
impl IndicatorModule for PolledModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn initialize(&self) -> Result<(), InitError> {
        let Some(first) = self.symbols.first() else {
            return Err(InitError::NoSymbols);
        };
        if self.initialized.load(Ordering::Acquire) {
            return Err(InitError::AlreadyInitialized);
        }

        self.check_endpoint(first).await.map_err(InitError::Upstream)?;
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(InitError::AlreadyInitialized);
        }

        info!(module = %self.name, symbols = ?self.symbols, cadence = ?self.cadence, "Module initialized");
        Ok(())
    }

    async fn update(&self) -> Result<(), UpdateError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(UpdateError::NotInitialized);
        }
        let now = self.clock.now();

        let results = join_all(self.symbols.iter().map(|symbol| async move {
            (symbol.as_str(), self.poll_symbol(symbol, now).await)
        }))
        .await;

        let mut failed = Vec::new();
        let mut last_error = String::new();
        {
            let mut latest = self.latest.write();
            for (symbol, result) in results {
                match result {
                    Ok(sample) => {
                        latest.insert(symbol.to_string(), sample);
                    }
                    Err(e) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(module = %self.name, symbol, error = %e, "Poll failed");
                        failed.push(symbol.to_string());
                        last_error = e;
                    }
                }
            }
        }

        let values: BTreeMap<String, SymbolValues> = self
            .latest
            .read()
            .iter()
            .map(|(symbol, sample)| (symbol.clone(), sample.values.clone()))
            .collect();

        let mut status = self.status.write();
        status.per_symbol_values = values;
        status.counters = self.counters();

        if failed.len() == self.symbols.len() {
            let err = UpdateError::AllRequestsFailed {
                attempted: failed.len(),
                last_error,
            };
            status.health = Health::Degraded;
            status.last_error = Some(err.to_string());
            return Err(err);
        }

        status.last_update_time = Some(now);
        if failed.is_empty() {
            status.health = Health::Healthy;
            status.last_error = None;
        } else {
            status.health = Health::Degraded;
            status.last_error = Some(format!(
                "{} of {} requests failed ({}): {last_error}",
                failed.len(),
                self.symbols.len(),
                failed.join(", ")
            ));
        }
        debug!(
            module = %self.name,
            health = status.health.as_str(),
            failed = failed.len(),
            "Cycle complete"
        );
        Ok(())
    }

    async fn save(&self) -> Result<(), PersistError> {
        let now = self.clock.now();
        let records: Vec<SnapshotRecord> = self
            .latest
            .read()
            .iter()
            .map(|(symbol, sample)| {
                SnapshotRecord::from_values(
                    &self.name,
                    symbol,
                    now,
                    Some(sample.observed_at),
                    &sample.values,
                )
            })
            .collect();

        self.persistence.flush(&records).await
    }

    fn status(&self) -> ModuleStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::{context_with, start_time, FakeMetadata};
    use orderflow_data::MemorySnapshotStore;

    fn oi(symbol: &str, value: Decimal) -> OpenInterest {
        OpenInterest {
            symbol: symbol.to_string(),
            open_interest: value,
            time: start_time(),
        }
    }

    fn force_order(side: LiquidationSide, price: Decimal, qty: Decimal, secs_ago: i64) -> ForceOrder {
        ForceOrder {
            symbol: "BTCUSDT".to_string(),
            side,
            price,
            quantity: qty,
            time: start_time() - chrono::Duration::seconds(secs_ago),
        }
    }

    fn module(
        variant: PolledVariant,
        symbols: &[&str],
        metadata: &Arc<FakeMetadata>,
        store: &MemorySnapshotStore,
    ) -> PolledModule {
        let ctx = context_with(symbols, store, Arc::clone(metadata) as Arc<dyn MetadataClient>);
        PolledModule::new(variant, &ctx)
    }

    #[tokio::test]
    async fn test_open_interest_change_between_polls() {
        let metadata = Arc::new(FakeMetadata::default());
        metadata.open_interest.lock().extend([
            ("BTCUSDT".to_string(), oi("BTCUSDT", dec!(1000))),
            ("ETHUSDT".to_string(), oi("ETHUSDT", dec!(500))),
        ]);
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::OpenInterest, &["BTCUSDT", "ETHUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();
        let first = module.status();
        assert_eq!(first.health, Health::Healthy);
        assert_eq!(first.per_symbol_values["BTCUSDT"].signal.as_deref(), Some("flat"));

        metadata
            .open_interest
            .lock()
            .insert("BTCUSDT".to_string(), oi("BTCUSDT", dec!(1050)));
        module.update().await.unwrap();

        let btc = &module.status().per_symbol_values["BTCUSDT"];
        assert_eq!(btc.metric("oi_change"), Some(dec!(50)));
        assert_eq!(btc.metric("oi_change_pct"), Some(dec!(5)));
        assert_eq!(btc.signal.as_deref(), Some("rising"));
        // Probe plus two cycles of two symbols
        assert_eq!(metadata.calls(), 5);
        assert_eq!(module.status().counters["requests"], 5);

        module.save().await.unwrap();
        assert_eq!(store.current_len(), 2);
        let row = store.current("open_interest", "BTCUSDT").unwrap();
        assert_eq!(row.value("open_interest"), Some(dec!(1050)));
    }

    #[tokio::test]
    async fn test_partial_failure_degrades_but_succeeds() {
        let metadata = Arc::new(FakeMetadata::default());
        metadata
            .open_interest
            .lock()
            .insert("BTCUSDT".to_string(), oi("BTCUSDT", dec!(1000)));
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::OpenInterest, &["BTCUSDT", "ETHUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();

        let status = module.status();
        assert_eq!(status.health, Health::Degraded);
        assert!(status.last_update_time.is_some());
        assert!(status.last_error.unwrap().contains("ETHUSDT"));
        assert!(status.per_symbol_values.contains_key("BTCUSDT"));
        assert!(!status.per_symbol_values.contains_key("ETHUSDT"));
        assert_eq!(status.counters["failures"], 1);
    }

    #[tokio::test]
    async fn test_all_requests_failed_keeps_last_values() {
        let metadata = Arc::new(FakeMetadata::default());
        metadata
            .open_interest
            .lock()
            .insert("BTCUSDT".to_string(), oi("BTCUSDT", dec!(1000)));
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::OpenInterest, &["BTCUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();
        metadata.open_interest.lock().clear();

        let err = module.update().await.unwrap_err();
        assert!(matches!(err, UpdateError::AllRequestsFailed { attempted: 1, .. }));

        let status = module.status();
        assert_eq!(status.health, Health::Degraded);
        assert_eq!(
            status.per_symbol_values["BTCUSDT"].metric("open_interest"),
            Some(dec!(1000))
        );
    }

    #[tokio::test]
    async fn test_funding_bias() {
        let metadata = Arc::new(FakeMetadata::default());
        metadata.premium.lock().insert(
            "BTCUSDT".to_string(),
            PremiumIndex {
                symbol: "BTCUSDT".to_string(),
                mark_price: dec!(50000),
                last_funding_rate: dec!(0.0005),
                next_funding_time: None,
                time: start_time(),
            },
        );
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::Funding, &["BTCUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();

        let btc = &module.status().per_symbol_values["BTCUSDT"];
        assert_eq!(btc.signal.as_deref(), Some("longs_pay"));
        assert_eq!(btc.metric("funding_rate_annualized_pct"), Some(dec!(54.75)));
    }

    #[test]
    fn test_funding_neutral_band() {
        let premium = |rate| PremiumIndex {
            symbol: "BTCUSDT".to_string(),
            mark_price: dec!(50000),
            last_funding_rate: rate,
            next_funding_time: None,
            time: start_time(),
        };

        assert_eq!(funding_values(&premium(dec!(0.0001))).signal.as_deref(), Some("neutral"));
        assert_eq!(
            funding_values(&premium(dec!(-0.0003))).signal.as_deref(),
            Some("shorts_pay")
        );
    }

    #[tokio::test]
    async fn test_liquidations_counted_once() {
        let metadata = Arc::new(FakeMetadata::default());
        metadata.force_orders.lock().insert(
            "BTCUSDT".to_string(),
            vec![
                force_order(LiquidationSide::Long, dec!(100), dec!(1), 60),
                force_order(LiquidationSide::Long, dec!(100), dec!(2), 10),
                force_order(LiquidationSide::Short, dec!(50), dec!(1), 5),
            ],
        );
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::Liquidations, &["BTCUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();

        // Looks back one 30s cadence: the 60s-old order is excluded
        let btc = module.status().per_symbol_values["BTCUSDT"].clone();
        assert_eq!(btc.metric("long_liquidated_usd"), Some(dec!(200)));
        assert_eq!(btc.metric("short_liquidated_usd"), Some(dec!(50)));
        assert_eq!(btc.metric("net_delta"), Some(dec!(150)));
        assert_eq!(btc.metric("count"), Some(dec!(2)));
        assert_eq!(btc.signal.as_deref(), Some("longs_liquidated"));

        module.update().await.unwrap();
        let btc = &module.status().per_symbol_values["BTCUSDT"];
        assert_eq!(btc.metric("count"), Some(dec!(0)));
        assert_eq!(btc.signal.as_deref(), Some("quiet"));
    }

    #[tokio::test]
    async fn test_liquidation_sharing_cursor_millisecond_is_reported() {
        let metadata = Arc::new(FakeMetadata::default());
        let first = force_order(LiquidationSide::Long, dec!(100), dec!(1), 5);
        metadata
            .force_orders
            .lock()
            .insert("BTCUSDT".to_string(), vec![first.clone()]);
        let store = MemorySnapshotStore::new();
        let module = module(PolledVariant::Liquidations, &["BTCUSDT"], &metadata, &store);

        module.initialize().await.unwrap();
        module.update().await.unwrap();
        assert_eq!(
            module.status().per_symbol_values["BTCUSDT"].metric("count"),
            Some(dec!(1))
        );

        // Published after the previous poll, same millisecond as the cursor
        let late = force_order(LiquidationSide::Short, dec!(100), dec!(3), 5);
        metadata
            .force_orders
            .lock()
            .insert("BTCUSDT".to_string(), vec![first, late]);

        module.update().await.unwrap();
        let btc = module.status().per_symbol_values["BTCUSDT"].clone();
        assert_eq!(btc.metric("count"), Some(dec!(1)));
        assert_eq!(btc.metric("short_liquidated_usd"), Some(dec!(300)));
        assert_eq!(btc.metric("long_liquidated_usd"), Some(dec!(0)));

        module.update().await.unwrap();
        assert_eq!(
            module.status().per_symbol_values["BTCUSDT"].metric("count"),
            Some(dec!(0))
        );
    }

    #[tokio::test]
    async fn test_initialize_errors() {
        let metadata = Arc::new(FakeMetadata::default());
        let store = MemorySnapshotStore::new();

        let empty = module(PolledVariant::Funding, &[], &metadata, &store);
        assert_eq!(empty.initialize().await, Err(InitError::NoSymbols));

        let unreachable = module(PolledVariant::Funding, &["BTCUSDT"], &metadata, &store);
        assert!(matches!(
            unreachable.initialize().await,
            Err(InitError::Upstream(_))
        ));
        assert_eq!(unreachable.update().await, Err(UpdateError::NotInitialized));

        metadata
            .open_interest
            .lock()
            .insert("BTCUSDT".to_string(), oi("BTCUSDT", dec!(1)));
        let ready = module(PolledVariant::OpenInterest, &["BTCUSDT"], &metadata, &store);
        ready.initialize().await.unwrap();
        assert_eq!(
            ready.initialize().await,
            Err(InitError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_variant_kind_mapping() {
        for variant in [
            PolledVariant::OpenInterest,
            PolledVariant::Funding,
            PolledVariant::Liquidations,
        ] {
            assert_eq!(PolledVariant::from_kind(variant.kind()), Some(variant));
        }
        assert_eq!(PolledVariant::from_kind(ModuleKind::Cvd), None);
    }
}
