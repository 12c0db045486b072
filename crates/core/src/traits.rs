use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, InitError, PersistError, UpdateError};
use crate::status::ModuleStatus;

/// Lifecycle shared by every indicator variant.
///
/// Methods take `&self` so the module loop and the flush timer can hold the
/// same `Arc` concurrently.
#[async_trait]
pub trait IndicatorModule: Send + Sync {
    fn name(&self) -> &str;

    /// Interval between `update` calls.
    fn cadence(&self) -> Duration;

    async fn initialize(&self) -> Result<(), InitError>;

    /// One computation cycle.
    async fn update(&self) -> Result<(), UpdateError>;

    async fn save(&self) -> Result<(), PersistError>;

    fn status(&self) -> ModuleStatus;

    /// Releases owned connections and tasks.
    async fn shutdown(&self) {}
}

/// Indicator variants known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Cumulative volume delta from the trade stream
    Cvd,
    /// Order book imbalance from the depth stream
    OrderBook,
    /// Open interest polled from the metadata endpoint
    OpenInterest,
    /// Funding rate polled from the metadata endpoint
    Funding,
    /// Forced liquidations polled from the metadata endpoint
    Liquidations,
}

impl ModuleKind {
    /// Returns all variants.
    #[must_use]
    pub fn all() -> Vec<ModuleKind> {
        vec![
            Self::Cvd,
            Self::OrderBook,
            Self::OpenInterest,
            Self::Funding,
            Self::Liquidations,
        ]
    }

    /// Configuration name of the variant.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cvd => "cvd",
            Self::OrderBook => "orderbook",
            Self::OpenInterest => "open_interest",
            Self::Funding => "funding",
            Self::Liquidations => "liquidations",
        }
    }

    /// Cadence used when the configuration has no override.
    #[must_use]
    pub const fn default_cadence(&self) -> Duration {
        match self {
            Self::Cvd | Self::OrderBook => Duration::from_secs(5),
            Self::Liquidations => Duration::from_secs(30),
            Self::OpenInterest | Self::Funding => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cvd" => Ok(Self::Cvd),
            "orderbook" | "order_book" => Ok(Self::OrderBook),
            "open_interest" | "oi" => Ok(Self::OpenInterest),
            "funding" | "funding_rate" => Ok(Self::Funding),
            "liquidations" => Ok(Self::Liquidations),
            other => Err(ConfigError::UnknownModule(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_kind_round_trips_names() {
        for kind in ModuleKind::all() {
            assert_eq!(kind.as_str().parse::<ModuleKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_module_kind_aliases() {
        assert_eq!("OI".parse::<ModuleKind>().unwrap(), ModuleKind::OpenInterest);
        assert_eq!(
            " funding_rate ".parse::<ModuleKind>().unwrap(),
            ModuleKind::Funding
        );
    }

    #[test]
    fn test_unknown_module_name() {
        let err = "vwap".parse::<ModuleKind>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownModule("vwap".to_string()));
    }

    #[test]
    fn test_default_cadences_differ() {
        assert_eq!(ModuleKind::Cvd.default_cadence(), Duration::from_secs(5));
        assert_eq!(
            ModuleKind::OpenInterest.default_cadence(),
            Duration::from_secs(60)
        );
    }
}
