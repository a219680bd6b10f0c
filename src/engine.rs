//! Settlement engine.
//!
//! The server is the sole settlement authority: outcomes come from the
//! configured win-rate draw and the price source, never from the client.
//! Settlement runs either from the background sweep (expired rounds) or
//! from an explicit client trigger, and both paths share the same
//! transactional settle step, so a round can only ever settle once.

use rand::Rng;
use tokio::{sync::broadcast, time::interval};
use tracing::{debug, info, warn};

use crate::{
    error::ApiError,
    feed::PriceSource,
    models::{DueRound, RoundFinished, WsServerEvent},
    store::TradingDb,
};

/// Fixed payout: 85% return on the stake on a win.
pub const PAYOUT_RATE: f64 = 0.85;

/// Draw a win with the configured probability. A draw in [1,100] wins iff
/// it is at or below the win rate, so 0 never wins and 100 always does.
pub fn decide(win_rate_percent: i64) -> bool {
    let draw: i64 = rand::thread_rng().gen_range(1..=100);
    draw <= win_rate_percent
}

/// Profit on a winning stake.
pub fn payout(stake: f64) -> f64 {
    stake * PAYOUT_RATE
}

#[derive(Clone)]
pub struct SettlementEngine {
    db: TradingDb,
    prices: PriceSource,
    events: broadcast::Sender<WsServerEvent>,
}

impl SettlementEngine {
    pub fn new(
        db: TradingDb,
        prices: PriceSource,
        events: broadcast::Sender<WsServerEvent>,
    ) -> Self {
        Self { db, prices, events }
    }

    /// Settle one round with a pre-fetched win rate. Records the result,
    /// applies balance effects and broadcasts `round_finished`.
    async fn settle_one(
        &self,
        round: &DueRound,
        win_rate: i64,
    ) -> Result<RoundFinished, ApiError> {
        let end_price = self.prices.current_price(Some(&round.symbol)).await;
        let win = decide(win_rate);
        let profit = if win {
            payout(round.amount)
        } else {
            -round.amount
        };

        let (account_id, new_balance) = self
            .db
            .settle_round(round.id, win, profit, end_price)
            .await?;

        let outcome = RoundFinished {
            round_id: round.id,
            user_id: round.user_id,
            account_id,
            win,
            profit,
            amount: round.amount,
            direction: round.direction,
            symbol: round.symbol.clone(),
            name: round.name.clone(),
            start_price: round.start_price,
            end_price,
            new_balance,
        };

        // Delivery is best effort; no subscribers is not an error.
        let _ = self
            .events
            .send(WsServerEvent::RoundFinished(outcome.clone()));

        info!(
            "🏁 Round {} settled: {} profit {:.2} balance {:.2}",
            round.id,
            if win { "WIN" } else { "LOSS" },
            profit,
            new_balance
        );

        Ok(outcome)
    }

    /// Client-requested settlement. The trigger carries no outcome data;
    /// the round must exist, be active and be past its end time.
    pub async fn settle_now(
        &self,
        round_id: i64,
        now_ms: i64,
    ) -> Result<RoundFinished, ApiError> {
        let round = self.db.get_active_round(round_id).await?;
        if round.end_time > now_ms {
            return Err(ApiError::invalid("round has not expired yet"));
        }
        let win_rate = self.db.win_rate().await?;
        self.settle_one(&round, win_rate).await
    }

    /// One sweep pass: snapshot every expired round, then settle each
    /// independently. The win rate is read once so a sweep is internally
    /// consistent, and one round's failure never blocks the rest.
    pub async fn sweep_expired_rounds(&self, now_ms: i64) -> Result<usize, ApiError> {
        let due = self.db.due_rounds(now_ms).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let win_rate = self.db.win_rate().await?;
        let mut settled = 0usize;
        for round in &due {
            match self.settle_one(round, win_rate).await {
                Ok(_) => settled += 1,
                Err(e) => warn!("failed to settle round {}: {}", round.id, e),
            }
        }
        Ok(settled)
    }

    /// Background sweep loop. Runs on a single task for the life of the
    /// process, so passes never overlap; iteration errors are logged and
    /// the next tick proceeds.
    pub async fn run(self, interval_secs: u64) {
        info!("⚖️  Settlement sweep started ({}s interval)", interval_secs);
        let mut ticker = interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            match self.sweep_expired_rounds(now_ms).await {
                Ok(0) => {}
                Ok(n) => debug!("sweep settled {} rounds", n),
                Err(e) => warn!("settlement sweep failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::BinanceClient;
    use crate::models::Direction;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_decide_exact_boundaries() {
        for _ in 0..10_000 {
            assert!(!decide(0), "win rate 0 must never win");
            assert!(decide(100), "win rate 100 must always win");
        }
    }

    #[test]
    fn test_decide_fifty_is_roughly_fair() {
        let wins = (0..20_000).filter(|_| decide(50)).count();
        let fraction = wins as f64 / 20_000.0;
        assert!(
            (0.45..=0.55).contains(&fraction),
            "win fraction {fraction} out of bounds"
        );
    }

    #[test]
    fn test_payout_is_exact() {
        assert_eq!(payout(100.0), 85.0);
        assert_eq!(payout(40.0), 34.0);
    }

    fn offline_engine(
        db: TradingDb,
    ) -> (SettlementEngine, broadcast::Receiver<WsServerEvent>) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let prices = PriceSource::new(BinanceClient::new(
            client,
            "http://127.0.0.1:9".to_string(),
        ));
        let (tx, rx) = broadcast::channel(64);
        (SettlementEngine::new(db, prices, tx), rx)
    }

    async fn open_expired_round(db: &TradingDb, now: i64) -> i64 {
        let pair_id = db.insert_pair("BTCUSDT", "Bitcoin").await.unwrap().id;
        db.open_round(1, pair_id, Direction::Up, 100.0, 30, 65_000.0, now)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sweep_win_scenario() {
        let temp = NamedTempFile::new().unwrap();
        let db = TradingDb::new(temp.path().to_str().unwrap(), 10_000.0).unwrap();
        db.set_win_rate(100).await.unwrap();

        let now = 1_700_000_000_000;
        let round_id = open_expired_round(&db, now).await;
        let (engine, mut rx) = offline_engine(db.clone());

        // Round expires after 30s; sweep a minute later.
        let settled = engine.sweep_expired_rounds(now + 60_000).await.unwrap();
        assert_eq!(settled, 1);

        let event = rx.try_recv().unwrap();
        let WsServerEvent::RoundFinished(outcome) = event else {
            panic!("expected round_finished event");
        };
        assert_eq!(outcome.round_id, round_id);
        assert!(outcome.win);
        assert_eq!(outcome.profit, 85.0);
        // 10000 - 100 stake + (100 + 85) win credit.
        assert_eq!(outcome.new_balance, 10_085.0);
    }

    #[tokio::test]
    async fn test_sweep_loss_scenario() {
        let temp = NamedTempFile::new().unwrap();
        let db = TradingDb::new(temp.path().to_str().unwrap(), 10_000.0).unwrap();
        db.set_win_rate(0).await.unwrap();

        let now = 1_700_000_000_000;
        open_expired_round(&db, now).await;
        let (engine, mut rx) = offline_engine(db.clone());

        engine.sweep_expired_rounds(now + 60_000).await.unwrap();

        let WsServerEvent::RoundFinished(outcome) = rx.try_recv().unwrap() else {
            panic!("expected round_finished event");
        };
        assert!(!outcome.win);
        assert_eq!(outcome.profit, -100.0);
        // Stake already debited at open; a loss changes nothing further.
        assert_eq!(outcome.new_balance, 9_900.0);
    }

    #[tokio::test]
    async fn test_sweep_skips_unexpired_rounds() {
        let temp = NamedTempFile::new().unwrap();
        let db = TradingDb::new(temp.path().to_str().unwrap(), 10_000.0).unwrap();

        let now = 1_700_000_000_000;
        open_expired_round(&db, now).await;
        let (engine, _rx) = offline_engine(db.clone());

        // Ten seconds in: the 30s round is still running.
        let settled = engine.sweep_expired_rounds(now + 10_000).await.unwrap();
        assert_eq!(settled, 0);
        assert_eq!(db.list_active_rounds(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_now_rejects_unexpired_round() {
        let temp = NamedTempFile::new().unwrap();
        let db = TradingDb::new(temp.path().to_str().unwrap(), 10_000.0).unwrap();

        let now = 1_700_000_000_000;
        let round_id = open_expired_round(&db, now).await;
        let (engine, _rx) = offline_engine(db.clone());

        let err = engine.settle_now(round_id, now + 1_000).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));

        // After expiry the trigger settles exactly once.
        engine.settle_now(round_id, now + 60_000).await.unwrap();
        let err = engine.settle_now(round_id, now + 60_000).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_settle_now_unknown_round() {
        let temp = NamedTempFile::new().unwrap();
        let db = TradingDb::new(temp.path().to_str().unwrap(), 10_000.0).unwrap();
        let (engine, _rx) = offline_engine(db);

        let err = engine.settle_now(42, 1_700_000_000_000).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
