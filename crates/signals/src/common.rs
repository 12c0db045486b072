use std::str::FromStr;

use orderflow_core::{ConnectError, MalformedEventError};
use rust_decimal::Decimal;
use tokio_tungstenite::connect_async;
use url::Url;

pub const BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com";
pub const BINANCE_FUTURES_API: &str = "https://fapi.binance.com";

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Builds a combined-stream URL, e.g. `{base}/stream?streams=btcusdt@aggTrade/ethusdt@aggTrade`.
pub fn combined_stream_url(base: &str, symbols: &[String], channel: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{}", s.to_lowercase(), channel))
        .collect();
    format!(
        "{}/stream?streams={}",
        base.trim_end_matches('/'),
        streams.join("/")
    )
}

pub async fn connect_websocket(url: &str) -> Result<WsStream, ConnectError> {
    let url = Url::parse(url).map_err(|e| ConnectError::Rejected(format!("bad url {url}: {e}")))?;
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
    Ok(ws_stream)
}

/// Parses an upstream decimal string field.
pub fn parse_decimal(symbol: &str, field: &str, raw: &str) -> Result<Decimal, MalformedEventError> {
    Decimal::from_str(raw).map_err(|_| {
        MalformedEventError::Decode(format!("{symbol}: {field} is not a decimal: {raw:?}"))
    })
}

/// True for the first occurrence and every 1000th after it.
#[must_use]
pub fn should_log_occurrence(count: u64) -> bool {
    count == 1 || count % 1000 == 0
}
