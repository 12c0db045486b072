//! Upstream metadata endpoint client.
//!
//! Request/response calls for open interest, premium index (funding) and
//! recent forced orders. Calls are not rate limited here; poll-based
//! modules take a permit from the shared limiter before each call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_core::MetadataConfig;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::common::BINANCE_FUTURES_API;

/// Metadata request failure.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Open interest for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenInterest {
    pub symbol: String,
    /// Open contracts in base asset units
    pub open_interest: Decimal,
    pub time: DateTime<Utc>,
}

/// Premium index snapshot carrying the current funding rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PremiumIndex {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_funding_rate: Decimal,
    pub next_funding_time: Option<DateTime<Utc>>,
    pub time: DateTime<Utc>,
}

/// Side of a forced order; a SELL liquidates a long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationSide {
    /// Long position closed by a forced sell
    Long,
    /// Short position closed by a forced buy
    Short,
}

/// One forced liquidation.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceOrder {
    pub symbol: String,
    pub side: LiquidationSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub time: DateTime<Utc>,
}

impl ForceOrder {
    /// Notional value in quote currency.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Source of metadata snapshots.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest, MetadataError>;

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, MetadataError>;

    /// Forced orders at or after `since`, oldest first.
    async fn force_orders(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForceOrder>, MetadataError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    symbol: String,
    open_interest: Decimal,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPremiumIndex {
    symbol: String,
    mark_price: Decimal,
    last_funding_rate: Decimal,
    next_funding_time: Option<i64>,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawForceOrder {
    symbol: String,
    side: String,
    #[serde(default)]
    average_price: Option<Decimal>,
    price: Decimal,
    #[serde(default)]
    executed_qty: Option<Decimal>,
    orig_qty: Decimal,
    time: i64,
}

fn millis(field: &str, value: i64) -> Result<DateTime<Utc>, MetadataError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| MetadataError::Decode(format!("{field} {value} out of range")))
}

impl RawForceOrder {
    fn into_force_order(self) -> Result<ForceOrder, MetadataError> {
        let side = match self.side.as_str() {
            "SELL" => LiquidationSide::Long,
            "BUY" => LiquidationSide::Short,
            other => return Err(MetadataError::Decode(format!("unknown side {other:?}"))),
        };
        // Filled price and quantity when present, order values otherwise
        let price = self
            .average_price
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(self.price);
        let quantity = self
            .executed_qty
            .filter(|q| *q > Decimal::ZERO)
            .unwrap_or(self.orig_qty);

        Ok(ForceOrder {
            symbol: self.symbol,
            side,
            price,
            quantity,
            time: millis("time", self.time)?,
        })
    }
}

/// Binance Futures REST client.
#[derive(Debug, Clone)]
pub struct BinanceMetadataClient {
    client: Client,
    base_url: String,
}

impl BinanceMetadataClient {
    /// Creates a client from the metadata configuration section.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &MetadataConfig) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MetadataError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MetadataError::Decode(e.to_string()))
    }
}

impl Default for BinanceMetadataClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            base_url: BINANCE_FUTURES_API.to_string(),
        }
    }
}

#[async_trait]
impl MetadataClient for BinanceMetadataClient {
    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest, MetadataError> {
        let raw: RawOpenInterest = self
            .get("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await?;
        Ok(OpenInterest {
            symbol: raw.symbol,
            open_interest: raw.open_interest,
            time: millis("time", raw.time)?,
        })
    }

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, MetadataError> {
        let raw: RawPremiumIndex = self
            .get("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        let next_funding_time = match raw.next_funding_time {
            Some(ms) if ms > 0 => Some(millis("nextFundingTime", ms)?),
            _ => None,
        };
        Ok(PremiumIndex {
            symbol: raw.symbol,
            mark_price: raw.mark_price,
            last_funding_rate: raw.last_funding_rate,
            next_funding_time,
            time: millis("time", raw.time)?,
        })
    }

    async fn force_orders(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForceOrder>, MetadataError> {
        let mut query = vec![("symbol", symbol.to_string())];
        if let Some(since) = since {
            query.push(("startTime", since.timestamp_millis().to_string()));
        }

        let raw: Vec<RawForceOrder> = self.get("/fapi/v1/allForceOrders", &query).await?;
        let mut orders = raw
            .into_iter()
            .map(RawForceOrder::into_force_order)
            .collect::<Result<Vec<_>, _>>()?;
        orders.sort_by_key(|o| o.time);
        Ok(orders)
    }
}
