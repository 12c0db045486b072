//! Module status reported to the orchestrator after every cycle.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::DerivedMetrics;

/// Health of a module or feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Down,
}

impl Health {
    /// Returns the worse of two health values.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Down, _) | (_, Self::Down) => Self::Down,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

/// Derived values a module reports for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolValues {
    /// Numeric metrics by name
    pub metrics: BTreeMap<String, Decimal>,
    /// Optional categorical signal (trend, bias, ...)
    pub signal: Option<String>,
}

impl SymbolValues {
    /// Adds a numeric metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Sets the categorical signal.
    #[must_use]
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    /// Looks up a numeric metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<Decimal> {
        self.metrics.get(name).copied()
    }
}

impl From<&DerivedMetrics> for SymbolValues {
    fn from(m: &DerivedMetrics) -> Self {
        let mut values = Self::default()
            .with_metric("buy_ratio", m.buy_ratio)
            .with_metric("cumulative_delta", m.cumulative_delta)
            .with_metric("total_trades", Decimal::from(m.total_trades))
            .with_signal(m.trend.as_str());
        if let Some(price) = m.last_price {
            values = values.with_metric("last_price", price);
        }
        values
    }
}

/// Status a module publishes after each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module_name: String,
    pub per_symbol_values: BTreeMap<String, SymbolValues>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub health: Health,
    pub last_error: Option<String>,
    /// Module-level counters (feed statistics for stream-backed modules)
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
}

impl ModuleStatus {
    /// Initial status before the first cycle: no values, degraded.
    pub fn pending(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            per_symbol_values: BTreeMap::new(),
            last_update_time: None,
            health: Health::Degraded,
            last_error: None,
            counters: BTreeMap::new(),
        }
    }

    /// Marks the status degraded with an error, keeping the last values.
    ///
    /// A Down status stays Down.
    #[must_use]
    pub fn degraded(mut self, error: impl Into<String>) -> Self {
        self.health = self.health.worst(Health::Degraded);
        self.last_error = Some(error.into());
        self
    }

    /// Time since the last successful update, if any.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_update_time
            .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
    }
}
