//! Deterministic simulated market data.
//!
//! Used whenever the upstream source is unavailable or a symbol falls
//! outside the live naming convention. Prices walk around a fixed
//! per-symbol base with small bounded jitter.

use chrono::Utc;
use rand::Rng;

use crate::models::{Candle, Timeframe};

/// Reference prices for simulated symbols.
const BASE_PRICES: &[(&str, f64)] = &[
    ("AAPL", 175.0),
    ("BTCUSDT", 65_000.0),
    ("ETHUSDT", 3_500.0),
    ("BNBUSDT", 600.0),
    ("SOLUSDT", 150.0),
    ("ADAUSDT", 0.5),
];

const FALLBACK_BASE: f64 = 100.0;

fn base_price(symbol: &str) -> f64 {
    BASE_PRICES
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, p)| *p)
        .unwrap_or(FALLBACK_BASE)
}

/// Arbitrary price for a pair we know nothing about.
pub fn unknown_pair_price() -> f64 {
    let mut rng = rand::thread_rng();
    FALLBACK_BASE + rng.gen_range(-1.0..=1.0)
}

/// Simulated current price: base ± 0.1%.
pub fn simulated_price(symbol: &str) -> f64 {
    let base = base_price(symbol);
    let mut rng = rand::thread_rng();
    base + rng.gen_range(-base * 0.001..=base * 0.001)
}

/// Generate `limit` synthetic candles walking backward from now, one per
/// timeframe interval, oldest first. Each candle chains off the previous
/// close with bounded random deltas.
pub fn synthetic_candles(seed_price: f64, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
    let interval = timeframe.seconds();
    let now = Utc::now().timestamp();
    let mut rng = rand::thread_rng();

    let mut candles = Vec::with_capacity(limit);
    let mut base = seed_price;

    for i in (0..limit).rev() {
        let time = now - interval * i as i64;

        let open = base * (1.0 + rng.gen_range(-0.002..=0.002));
        let close = open * (1.0 + rng.gen_range(-0.001..=0.001));
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..=0.001));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..=0.001));

        candles.push(Candle {
            time,
            open: round5(open),
            high: round5(high),
            low: round5(low),
            close: round5(close),
        });

        base = close;
    }

    candles
}

fn round5(v: f64) -> f64 {
    (v * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_price_stays_near_base() {
        for _ in 0..1000 {
            let p = simulated_price("BTCUSDT");
            assert!((p - 65_000.0).abs() <= 65.0);
        }
        // Unknown symbols walk around the fallback base.
        for _ in 0..1000 {
            let p = simulated_price("EURUSD");
            assert!((p - 100.0).abs() <= 0.1);
        }
    }

    #[test]
    fn test_unknown_pair_price_bounds() {
        for _ in 0..1000 {
            let p = unknown_pair_price();
            assert!((99.0..=101.0).contains(&p));
        }
    }

    #[test]
    fn test_synthetic_candles_count_and_ordering() {
        let candles = synthetic_candles(65_000.0, Timeframe::M5, 100);
        assert_eq!(candles.len(), 100);

        for pair in candles.windows(2) {
            assert_eq!(pair[1].time - pair[0].time, 300);
        }
    }

    #[test]
    fn test_synthetic_candles_are_well_formed() {
        let candles = synthetic_candles(3_500.0, Timeframe::M1, 50);
        for c in &candles {
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
            assert!(c.open > 0.0 && c.close > 0.0);
        }
    }
}
