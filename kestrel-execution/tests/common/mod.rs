#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use kestrel_config::EngineConfig;
use kestrel_core::{ExecutionReport, Instrument, MarketSnapshot, QuoteLevel};
use kestrel_execution::{AlgoEngine, InstrumentRegistry};
use kestrel_paper::PaperGateway;
use rust_decimal::Decimal;

pub const SYMBOL: &str = "BTCUSDT";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn at_ms(ms: i64) -> DateTime<Utc> {
    t0() + Duration::milliseconds(ms)
}

pub fn instrument() -> Instrument {
    Instrument::new(SYMBOL, Decimal::new(1, 2), Decimal::ONE)
}

pub fn config() -> EngineConfig {
    EngineConfig {
        max_orders_per_sec: 1_000,
        strict_actions: true,
        ..EngineConfig::default()
    }
}

pub fn engine_with(config: EngineConfig, venue: Arc<PaperGateway>) -> AlgoEngine {
    let registry = InstrumentRegistry::from_instruments(vec![instrument()]).unwrap();
    AlgoEngine::new(config, venue, registry)
}

pub fn book(bid: i64, ask: i64, ts: DateTime<Utc>) -> MarketSnapshot {
    MarketSnapshot {
        symbol: SYMBOL.into(),
        bid: Some(QuoteLevel::new(Decimal::from(bid), Decimal::from(1_000))),
        ask: Some(QuoteLevel::new(Decimal::from(ask), Decimal::from(1_000))),
        last_price: None,
        timestamp: ts,
    }
}

/// Feed every pending venue report back into the engine until the venue goes quiet.
pub fn pump(engine: &mut AlgoEngine, venue: &PaperGateway) {
    loop {
        let reports = venue.drain_reports();
        if reports.is_empty() {
            break;
        }
        for report in reports {
            match report {
                ExecutionReport::OrderUpdate(update) => {
                    engine.on_order_update(update);
                }
                ExecutionReport::Trade(trade) => {
                    engine.on_trade(trade);
                }
            }
        }
    }
}

pub fn last_order_id(venue: &PaperGateway) -> String {
    venue
        .sent_orders()
        .last()
        .map(|(order_id, _)| order_id.clone())
        .expect("venue has no orders")
}
