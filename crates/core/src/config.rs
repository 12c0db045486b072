use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::TrendConfig;
use crate::traits::ModuleKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub modules: Vec<String>,
    /// Module name -> cadence in seconds
    pub cadences: HashMap<String, u64>,
    pub feed: FeedConfig,
    pub rate_limit: RateLimitConfig,
    pub metadata: MetadataConfig,
    pub persistence: PersistenceConfig,
    pub trend: TrendSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_url: String,
    pub max_restarts: u32,
    pub backoff_cap_secs: u64,
    pub read_timeout_secs: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub rest_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub flush_interval_secs: u64,
    /// PostgreSQL URL; in-memory store when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendSettings {
    pub strong_fraction: Decimal,
    pub moderate_fraction: Decimal,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            modules: vec![
                "cvd".to_string(),
                "open_interest".to_string(),
                "funding".to_string(),
                "liquidations".to_string(),
            ],
            cadences: HashMap::new(),
            feed: FeedConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metadata: MetadataConfig::default(),
            persistence: PersistenceConfig::default(),
            trend: TrendSettings::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://fstream.binance.com".to_string(),
            max_restarts: 10,
            backoff_cap_secs: 60,
            read_timeout_secs: 30,
            channel_capacity: 10_000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            max_in_flight: 10,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://fapi.binance.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            database_url: None,
            max_connections: 5,
        }
    }
}

impl Default for TrendSettings {
    fn default() -> Self {
        let defaults = TrendConfig::default();
        Self {
            strong_fraction: defaults.strong_fraction,
            moderate_fraction: defaults.moderate_fraction,
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl TrendSettings {
    #[must_use]
    pub fn to_trend_config(&self) -> TrendConfig {
        TrendConfig {
            strong_fraction: self.strong_fraction,
            moderate_fraction: self.moderate_fraction,
        }
    }
}

impl AppConfig {
    /// Symbols normalised to upper case, duplicates removed, order kept.
    #[must_use]
    pub fn normalized_symbols(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect()
    }

    /// Resolves configured module names, rejecting unknown ones.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownModule` for the first unknown name.
    pub fn module_kinds(&self) -> Result<Vec<ModuleKind>, ConfigError> {
        let mut kinds = Vec::new();
        for name in &self.modules {
            let kind: ModuleKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Cadence for a module, honouring overrides.
    #[must_use]
    pub fn cadence_for(&self, kind: ModuleKind) -> Duration {
        self.cadences
            .get(kind.as_str())
            .filter(|secs| **secs > 0)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| kind.default_cadence())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.normalized_symbols().is_empty() {
            return Err(ConfigError::Invalid("symbol list is empty".to_string()));
        }
        if self.module_kinds()?.is_empty() {
            return Err(ConfigError::Invalid("module list is empty".to_string()));
        }
        if self.rate_limit.requests_per_second == 0 || self.rate_limit.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "rate limit budget must be positive".to_string(),
            ));
        }
        if self.persistence.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush interval must be positive".to_string(),
            ));
        }
        if self.feed.channel_capacity == 0 || self.feed.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed channel capacity and read timeout must be positive".to_string(),
            ));
        }
        let trend = &self.trend;
        if trend.moderate_fraction <= Decimal::ZERO || trend.moderate_fraction > trend.strong_fraction
        {
            return Err(ConfigError::Invalid(format!(
                "trend fractions must satisfy 0 < moderate ({}) <= strong ({})",
                trend.moderate_fraction, trend.strong_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.persistence.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.feed.backoff_cap(), Duration::from_secs(60));
    }

    #[test]
    fn test_normalized_symbols_dedup_and_uppercase() {
        let config = AppConfig {
            symbols: vec![
                "btcusdt".to_string(),
                "BTCUSDT".to_string(),
                " ethusdt ".to_string(),
                String::new(),
            ],
            ..Default::default()
        };

        assert_eq!(config.normalized_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_cadence_override() {
        let mut config = AppConfig::default();
        config.cadences.insert("funding".to_string(), 15);
        config.cadences.insert("cvd".to_string(), 0);

        assert_eq!(
            config.cadence_for(ModuleKind::Funding),
            Duration::from_secs(15)
        );
        // Zero override falls back to the default
        assert_eq!(config.cadence_for(ModuleKind::Cvd), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_unknown_module() {
        let config = AppConfig {
            modules: vec!["cvd".to_string(), "vwap".to_string()],
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownModule("vwap".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_inverted_trend_fractions() {
        let mut config = AppConfig::default();
        config.trend.moderate_fraction = dec!(0.5);
        config.trend.strong_fraction = dec!(0.1);

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_symbols() {
        let config = AppConfig {
            symbols: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
