//! Drives polled modules against a mocked REST upstream through the manager
//! and into the in-memory snapshot store.

use std::sync::Arc;

use chrono::Utc;
use orderflow_core::{AppConfig, Health, MetadataConfig, SystemClock};
use orderflow_data::MemorySnapshotStore;
use orderflow_orchestrator::IndicatorManager;
use orderflow_signals::{BinanceMetadataClient, ModuleContext};
use rust_decimal_macros::dec;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/openInterest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "openInterest": "1000",
            "symbol": "BTCUSDT",
            "time": 1700000000000i64
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/premiumIndex"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "symbol": "BTCUSDT",
            "markPrice": "42000.5",
            "indexPrice": "41990.0",
            "estimatedSettlePrice": "41995.0",
            "lastFundingRate": "0.0003",
            "interestRate": "0.0001",
            "nextFundingTime": 1700006400000i64,
            "time": 1700000000000i64
        })))
        .mount(&server)
        .await;
    server
}

fn context(server: &MockServer, store: Arc<MemorySnapshotStore>) -> ModuleContext {
    let config = AppConfig {
        symbols: vec!["btcusdt".to_string()],
        modules: vec!["open_interest".to_string(), "funding".to_string()],
        metadata: MetadataConfig {
            rest_url: server.uri(),
            ..MetadataConfig::default()
        },
        ..AppConfig::default()
    };
    let metadata = BinanceMetadataClient::new(&config.metadata).unwrap();
    ModuleContext::new(config, Arc::new(metadata), store, Arc::new(SystemClock))
}

#[tokio::test]
async fn test_startup_cycle_publishes_and_persists_polled_values() {
    let server = upstream().await;
    let store = Arc::new(MemorySnapshotStore::new());
    let manager = IndicatorManager::new(context(&server, Arc::clone(&store))).unwrap();

    assert!(manager.run_startup_tests().await);

    let report = manager.status_report(Utc::now());
    assert_eq!(report.overall, Health::Healthy);
    let funding = report.module("funding").unwrap();
    assert_eq!(
        funding.values["BTCUSDT"].metric("funding_rate_annualized_pct"),
        Some(dec!(32.85))
    );
    assert_eq!(funding.values["BTCUSDT"].signal.as_deref(), Some("longs_pay"));

    assert_eq!(manager.flush().await, 0);
    let oi = store.current("open_interest", "BTCUSDT").unwrap();
    assert_eq!(oi.value("open_interest"), Some(dec!(1000)));
    assert_eq!(store.history_for("funding", "BTCUSDT").len(), 1);

    manager.stop();
    manager.run().await;
    // Final flush appends a second history row
    assert_eq!(store.history_for("funding", "BTCUSDT").len(), 2);
}
