mod common;

use std::sync::Arc;

use chrono::Utc;
use common::*;
use kestrel_core::{ExecutionReport, Side};
use kestrel_execution::{AlgoStatus, EngineError, EngineHandle, EngineRunner, ParentOrderSpec, StrategyKind};
use kestrel_paper::PaperGateway;
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::TryRecvError;

fn route(handle: &EngineHandle, venue: &PaperGateway) {
    for report in venue.drain_reports() {
        match report {
            ExecutionReport::OrderUpdate(update) => handle.deliver_order_update(update).unwrap(),
            ExecutionReport::Trade(trade) => handle.deliver_trade(trade).unwrap(),
        }
    }
}

fn iceberg(volume: i64, display: i64) -> ParentOrderSpec {
    ParentOrderSpec::new(SYMBOL, Side::Sell, Decimal::from(volume), StrategyKind::Iceberg)
        .with_limit(Decimal::from(100))
        .with_param("display_volume", Decimal::from(display))
}

#[tokio::test]
async fn handle_drives_an_algo_to_completion() {
    let venue = Arc::new(PaperGateway::default());
    let (handle, task) = EngineRunner::spawn(engine_with(config(), venue.clone()));
    let mut updates = handle.subscribe();

    let id = handle.start(iceberg(20, 10)).await.unwrap();
    assert_eq!(venue.sent_orders().len(), 1);

    for _ in 0..2 {
        route(&handle, &venue);
        let snapshot = book(100, 101, Utc::now());
        venue.on_snapshot(&snapshot);
        handle.deliver_tick(snapshot).unwrap();
        route(&handle, &venue);
        // the queue is FIFO, so a query observes everything delivered before it
        handle.query(id).await.unwrap();
    }

    let snapshot = handle.query(id).await.unwrap();
    assert_eq!(snapshot.status, AlgoStatus::Finished);
    assert_eq!(snapshot.traded, Decimal::from(20));
    assert_eq!(venue.sent_orders().len(), 2);

    let mut statuses = Vec::new();
    loop {
        match updates.try_recv() {
            Ok(update) => {
                assert_eq!(update.algo_id, id);
                assert_eq!(update.traded + update.remaining, Decimal::from(20));
                statuses.push(update.status);
            }
            Err(TryRecvError::Empty) => break,
            Err(err) => panic!("update stream broke: {err}"),
        }
    }
    assert_eq!(statuses.first(), Some(&AlgoStatus::Running));
    assert_eq!(statuses.last(), Some(&AlgoStatus::Finished));

    handle.shutdown().await.unwrap();
    let engine = task.await.unwrap();
    assert_eq!(engine.query(id).unwrap().status, AlgoStatus::Finished);
}

#[tokio::test]
async fn control_commands_round_trip() {
    let venue = Arc::new(PaperGateway::recording());
    let (handle, task) = EngineRunner::spawn(engine_with(config(), venue.clone()));

    let id = handle.start(iceberg(30, 10)).await.unwrap();
    assert_eq!(handle.pause(id).await.unwrap(), AlgoStatus::Paused);
    assert_eq!(handle.resume(id).await.unwrap(), AlgoStatus::Running);
    assert_eq!(handle.list_active().await.unwrap().len(), 1);

    let bad = ParentOrderSpec::new("DOGEUSDT", Side::Buy, Decimal::ONE, StrategyKind::Twap);
    assert!(matches!(handle.start(bad).await, Err(EngineError::InvalidSpec(_))));

    assert_eq!(handle.stop_all().await.unwrap(), 1);
    assert_eq!(handle.stop(id).await.unwrap(), AlgoStatus::Stopped);
    assert_eq!(venue.cancel_requests().len(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_live_algos_and_closes_the_handle() {
    let venue = Arc::new(PaperGateway::recording());
    let (handle, task) = EngineRunner::spawn(engine_with(config(), venue.clone()));
    let id = handle.start(iceberg(30, 10)).await.unwrap();

    handle.shutdown().await.unwrap();
    let engine = task.await.unwrap();
    assert_eq!(engine.query(id).unwrap().status, AlgoStatus::Stopped);
    assert_eq!(venue.cancel_requests().len(), 1);

    assert_eq!(
        handle.deliver_tick(book(99, 100, Utc::now())),
        Err(EngineError::EngineStopped)
    );
    assert_eq!(handle.query(id).await, Err(EngineError::EngineStopped));
}
