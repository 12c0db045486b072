//! Binance Futures stream connectors.
//!
//! Both connectors open one combined stream for the whole symbol set:
//! - [`BinanceTradeConnector`]: `<symbol>@aggTrade` into [`TradeEvent`]
//! - [`BinanceDepthConnector`]: `<symbol>@depth20@500ms` into [`DepthSnapshot`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{future, StreamExt};
use orderflow_core::{ConnectError, DepthSnapshot, MalformedEventError, TradeEvent};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::info;

use crate::collector::feed::{FeedConnector, FeedMessage, FeedStream};
use crate::common::{combined_stream_url, connect_websocket, parse_decimal, BINANCE_FUTURES_WS};

/// Binance aggTrade WebSocket message.
///
/// JSON format:
/// ```json
/// {
///   "e": "aggTrade",
///   "E": 1699999999999,
///   "s": "BTCUSDT",
///   "a": 123456789,
///   "p": "42750.50",
///   "q": "0.150",
///   "f": 100,
///   "l": 102,
///   "T": 1699999999998,
///   "m": true
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeEvent {
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub agg_trade_id: i64,
    /// Price
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time (milliseconds)
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Is the buyer the market maker?
    /// true = buyer is maker (seller aggressor) = SELL
    /// false = buyer is taker (buyer aggressor) = BUY
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl AggTradeEvent {
    /// Converts to a [`TradeEvent`].
    ///
    /// # Errors
    /// Returns `MalformedEventError::Decode` if price, quantity or time do not parse.
    pub fn to_trade_event(&self) -> Result<TradeEvent, MalformedEventError> {
        let price = parse_decimal(&self.symbol, "price", &self.price)?;
        let quantity = parse_decimal(&self.symbol, "quantity", &self.quantity)?;
        let timestamp = millis_to_utc(&self.symbol, self.trade_time)?;

        Ok(TradeEvent::new(
            &self.symbol,
            price,
            quantity,
            self.buyer_is_maker,
            timestamp,
        ))
    }
}

/// Binance partial depth message.
#[derive(Debug, Deserialize)]
pub struct DepthUpdate {
    /// Transaction time
    #[serde(rename = "T")]
    pub transaction_time: i64,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Bids (price, quantity)
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    /// Asks (price, quantity)
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

impl DepthUpdate {
    /// Converts to a [`DepthSnapshot`].
    ///
    /// # Errors
    /// Returns `MalformedEventError::Decode` if any level or the time does not parse.
    pub fn to_snapshot(&self) -> Result<DepthSnapshot, MalformedEventError> {
        Ok(DepthSnapshot {
            symbol: self.symbol.to_uppercase(),
            bids: parse_levels(&self.symbol, &self.bids)?,
            asks: parse_levels(&self.symbol, &self.asks)?,
            timestamp: millis_to_utc(&self.symbol, self.transaction_time)?,
        })
    }
}

/// Combined-stream envelope.
#[derive(Debug, Deserialize)]
pub struct StreamWrapper<T> {
    /// Stream name
    pub stream: String,
    /// Data payload
    pub data: T,
}

fn parse_levels(
    symbol: &str,
    levels: &[[String; 2]],
) -> Result<Vec<(Decimal, Decimal)>, MalformedEventError> {
    levels
        .iter()
        .map(|[price, qty]| {
            Ok((
                parse_decimal(symbol, "level price", price)?,
                parse_decimal(symbol, "level quantity", qty)?,
            ))
        })
        .collect()
}

fn millis_to_utc(symbol: &str, millis: i64) -> Result<DateTime<Utc>, MalformedEventError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        MalformedEventError::Decode(format!("{symbol}: timestamp {millis} out of range"))
    })
}

/// Decodes one combined-stream aggTrade payload.
pub fn decode_trade(text: &str) -> FeedMessage<TradeEvent> {
    match serde_json::from_str::<StreamWrapper<AggTradeEvent>>(text) {
        Ok(wrapper) => match wrapper.data.to_trade_event() {
            Ok(event) => FeedMessage::Event(event),
            Err(e) => FeedMessage::Malformed(e),
        },
        Err(e) => FeedMessage::Malformed(MalformedEventError::Decode(e.to_string())),
    }
}

/// Decodes one combined-stream depth payload.
pub fn decode_depth(text: &str) -> FeedMessage<DepthSnapshot> {
    match serde_json::from_str::<StreamWrapper<DepthUpdate>>(text) {
        Ok(wrapper) => match wrapper.data.to_snapshot() {
            Ok(snapshot) => FeedMessage::Event(snapshot),
            Err(e) => FeedMessage::Malformed(e),
        },
        Err(e) => FeedMessage::Malformed(MalformedEventError::Decode(e.to_string())),
    }
}

/// Maps a raw WebSocket frame onto a feed message. Control frames are skipped.
fn translate<E>(
    frame: Result<Message, tungstenite::Error>,
    decode: fn(&str) -> FeedMessage<E>,
) -> Option<Result<FeedMessage<E>, ConnectError>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(decode(&text))),
        Ok(Message::Close(frame)) => {
            let reason = frame.map_or_else(|| "close frame".to_string(), |f| f.reason.to_string());
            Some(Ok(FeedMessage::Closed(reason)))
        }
        Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(ConnectError::Protocol(e.to_string()))),
    }
}

async fn open_stream<E: Send + 'static>(
    base: &str,
    symbols: &[String],
    channel: &str,
    decode: fn(&str) -> FeedMessage<E>,
) -> Result<FeedStream<E>, ConnectError> {
    let url = combined_stream_url(base, symbols, channel);
    info!(%url, "Connecting to stream");

    let ws = connect_websocket(&url).await?;
    Ok(Box::pin(
        ws.filter_map(move |frame| future::ready(translate(frame, decode))),
    ))
}

/// Trade stream connector.
#[derive(Debug, Clone)]
pub struct BinanceTradeConnector {
    ws_url: String,
}

impl BinanceTradeConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl Default for BinanceTradeConnector {
    fn default() -> Self {
        Self::new(BINANCE_FUTURES_WS)
    }
}

#[async_trait]
impl FeedConnector for BinanceTradeConnector {
    type Event = TradeEvent;

    async fn connect(&self, symbols: &[String]) -> Result<FeedStream<TradeEvent>, ConnectError> {
        open_stream(&self.ws_url, symbols, "aggTrade", decode_trade).await
    }
}

/// Partial depth stream connector.
#[derive(Debug, Clone)]
pub struct BinanceDepthConnector {
    ws_url: String,
}

impl BinanceDepthConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl Default for BinanceDepthConnector {
    fn default() -> Self {
        Self::new(BINANCE_FUTURES_WS)
    }
}

#[async_trait]
impl FeedConnector for BinanceDepthConnector {
    type Event = DepthSnapshot;

    async fn connect(
        &self,
        symbols: &[String],
    ) -> Result<FeedStream<DepthSnapshot>, ConnectError> {
        open_stream(&self.ws_url, symbols, "depth20@500ms", decode_depth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::TradeSide;
    use rust_decimal_macros::dec;

    fn expect_event<E: std::fmt::Debug>(message: FeedMessage<E>) -> E {
        match message {
            FeedMessage::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_trade_buy_aggressor() {
        // buyer_is_maker = false means buyer was taker -> BUY
        let json = r#"{
            "stream": "btcusdt@aggTrade",
            "data": {
                "e": "aggTrade",
                "E": 1699999999999,
                "s": "BTCUSDT",
                "a": 123456789,
                "p": "42750.50",
                "q": "0.150",
                "f": 100,
                "l": 102,
                "T": 1699999999998,
                "m": false
            }
        }"#;

        let trade = expect_event(decode_trade(json));

        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, dec!(42750.50));
        assert_eq!(trade.size, dec!(0.150));
        assert_eq!(trade.side(), TradeSide::Buy);
        assert_eq!(trade.timestamp.timestamp_millis(), 1_699_999_999_998);
    }

    #[test]
    fn test_decode_trade_sell_aggressor() {
        let json = r#"{"stream":"ethusdt@aggTrade","data":{"s":"ETHUSDT","a":1,"p":"2250.00","q":"5.0","T":1699999999998,"m":true}}"#;

        let trade = expect_event(decode_trade(json));
        assert_eq!(trade.side(), TradeSide::Sell);
    }

    #[test]
    fn test_decode_trade_bad_price_is_malformed() {
        let json = r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT","a":1,"p":"abc","q":"1","T":1,"m":true}}"#;

        assert!(matches!(
            decode_trade(json),
            FeedMessage::Malformed(MalformedEventError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_trade_garbage_is_malformed() {
        assert!(matches!(
            decode_trade("not json"),
            FeedMessage::Malformed(MalformedEventError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_depth() {
        let json = r#"{
            "stream": "btcusdt@depth20@500ms",
            "data": {
                "e": "depthUpdate",
                "E": 1699999999999,
                "T": 1699999999990,
                "s": "BTCUSDT",
                "U": 1, "u": 2, "pu": 0,
                "b": [["42750.00", "2.0"], ["42749.50", "1.0"]],
                "a": [["42751.00", "1.0"]]
            }
        }"#;

        let snapshot = expect_event(decode_depth(json));

        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.bid_volume(), dec!(3.0));
        assert_eq!(snapshot.ask_volume(), dec!(1.0));
        assert_eq!(snapshot.bids[0], (dec!(42750.00), dec!(2.0)));
    }

    #[test]
    fn test_translate_control_frames() {
        assert!(translate(Ok(Message::Ping(vec![1])), decode_trade).is_none());

        let closed = translate(Ok(Message::Close(None)), decode_trade);
        assert!(matches!(closed, Some(Ok(FeedMessage::Closed(_)))));

        let failed = translate(
            Err(tungstenite::Error::ConnectionClosed),
            decode_trade,
        );
        assert!(matches!(failed, Some(Err(ConnectError::Protocol(_)))));
    }
}
