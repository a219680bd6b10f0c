//! Full round lifecycle against a real (temporary) database with an
//! unreachable upstream, so prices come from the simulated source.

use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use optionbot_backend::{
    engine::SettlementEngine,
    error::ApiError,
    feed::{BinanceClient, PriceSource},
    models::{Direction, WsServerEvent},
    store::TradingDb,
};

const START_BALANCE: f64 = 10_000.0;

struct Harness {
    db: TradingDb,
    engine: SettlementEngine,
    events: broadcast::Receiver<WsServerEvent>,
    _temp: NamedTempFile,
}

fn harness() -> Harness {
    let temp = NamedTempFile::new().unwrap();
    let db = TradingDb::new(temp.path().to_str().unwrap(), START_BALANCE).unwrap();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let prices = PriceSource::new(BinanceClient::new(client, "http://127.0.0.1:9".to_string()));

    let (tx, events) = broadcast::channel(64);
    let engine = SettlementEngine::new(db.clone(), prices, tx);

    Harness {
        db,
        engine,
        events,
        _temp: temp,
    }
}

async fn demo_balance(db: &TradingDb) -> f64 {
    db.get_or_create_accounts(1)
        .await
        .unwrap()
        .iter()
        .find(|a| a.account_type == "demo")
        .unwrap()
        .balance
}

#[tokio::test]
async fn winning_round_full_lifecycle() {
    let mut h = harness();
    h.db.set_win_rate(100).await.unwrap();
    let pair_id = h.db.insert_pair("BTCUSDT", "Bitcoin").await.unwrap().id;

    let now = 1_700_000_000_000;
    let round = h
        .db
        .open_round(1, pair_id, Direction::Up, 100.0, 30, 65_000.0, now)
        .await
        .unwrap();
    assert_eq!(round.end_time, now + 30_000);
    assert_eq!(demo_balance(&h.db).await, 9_900.0);
    assert_eq!(h.db.list_active_rounds(1).await.unwrap().len(), 1);

    // The sweep a minute later settles it and announces the outcome.
    let settled = h.engine.sweep_expired_rounds(now + 60_000).await.unwrap();
    assert_eq!(settled, 1);

    let WsServerEvent::RoundFinished(outcome) = h.events.try_recv().unwrap() else {
        panic!("expected round_finished");
    };
    assert_eq!(outcome.round_id, round.id);
    assert!(outcome.win);
    assert_eq!(outcome.profit, 85.0);
    assert_eq!(outcome.new_balance, 10_085.0);

    assert_eq!(demo_balance(&h.db).await, 10_085.0);
    assert!(h.db.list_active_rounds(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn losing_round_full_lifecycle() {
    let mut h = harness();
    h.db.set_win_rate(0).await.unwrap();
    let pair_id = h.db.insert_pair("ETHUSDT", "Ethereum").await.unwrap().id;

    let now = 1_700_000_000_000;
    h.db.open_round(1, pair_id, Direction::Down, 100.0, 30, 3_500.0, now)
        .await
        .unwrap();

    h.engine.sweep_expired_rounds(now + 60_000).await.unwrap();

    let WsServerEvent::RoundFinished(outcome) = h.events.try_recv().unwrap() else {
        panic!("expected round_finished");
    };
    assert!(!outcome.win);
    assert_eq!(outcome.profit, -100.0);
    assert_eq!(outcome.new_balance, 9_900.0);
    assert_eq!(demo_balance(&h.db).await, 9_900.0);
}

#[tokio::test]
async fn trigger_and_sweep_cannot_both_settle() {
    let h = harness();
    h.db.set_win_rate(100).await.unwrap();
    let pair_id = h.db.insert_pair("BTCUSDT", "Bitcoin").await.unwrap().id;

    let now = 1_700_000_000_000;
    let round = h
        .db
        .open_round(1, pair_id, Direction::Up, 100.0, 30, 65_000.0, now)
        .await
        .unwrap();

    // Client trigger settles first; the subsequent sweep finds nothing.
    h.engine.settle_now(round.id, now + 60_000).await.unwrap();
    let settled = h.engine.sweep_expired_rounds(now + 60_000).await.unwrap();
    assert_eq!(settled, 0);

    // The win credit landed exactly once.
    assert_eq!(demo_balance(&h.db).await, 10_085.0);

    let err = h.engine.settle_now(round.id, now + 60_000).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn balance_survives_restart() {
    let temp = NamedTempFile::new().unwrap();
    let path = temp.path().to_str().unwrap().to_string();

    {
        let db = TradingDb::new(&path, START_BALANCE).unwrap();
        let pair_id = db.insert_pair("BTCUSDT", "Bitcoin").await.unwrap().id;
        db.open_round(1, pair_id, Direction::Up, 250.0, 30, 65_000.0, 1_700_000_000_000)
            .await
            .unwrap();
    }

    // Reopen: the debit and the active round are still there.
    let db = TradingDb::new(&path, START_BALANCE).unwrap();
    assert_eq!(demo_balance(&db).await, 9_750.0);
    assert_eq!(db.list_active_rounds(1).await.unwrap().len(), 1);
}
