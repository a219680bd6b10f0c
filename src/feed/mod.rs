//! Price source: live upstream quotes with a simulated fallback.
//!
//! The contract is infallible. A timeout, network error or malformed
//! response is never escalated; it silently routes to the simulation, so a
//! slow upstream degrades to simulated data instead of stalling the round
//! lifecycle.

pub mod binance;
pub mod sim;

use std::collections::HashMap;

use tracing::debug;

use crate::models::{Candle, Timeframe, TradingPair};

pub use binance::{BinanceClient, MAX_KLINES_LIMIT};

/// Suffix that marks a symbol as quotable on the live upstream.
const LIVE_QUOTE_SUFFIX: &str = "USDT";

#[derive(Clone)]
pub struct PriceSource {
    upstream: BinanceClient,
}

impl PriceSource {
    pub fn new(upstream: BinanceClient) -> Self {
        Self { upstream }
    }

    /// Direct upstream access for callers that need exchange metadata
    /// (catalog sync) rather than prices.
    pub fn upstream(&self) -> &BinanceClient {
        &self.upstream
    }

    /// Current price for a symbol. `None` means the pair is unknown.
    pub async fn current_price(&self, symbol: Option<&str>) -> f64 {
        let Some(symbol) = symbol else {
            return sim::unknown_pair_price();
        };

        if symbol.ends_with(LIVE_QUOTE_SUFFIX) {
            match self.upstream.ticker_price(symbol).await {
                // Report the upstream price exactly, no rounding.
                Ok(price) => return price,
                Err(e) => {
                    debug!(symbol, error = %e, "live price unavailable, using simulation");
                }
            }
        }

        sim::simulated_price(symbol)
    }

    /// OHLC candles: upstream klines first, synthetic walk on any failure.
    pub async fn chart_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Vec<Candle> {
        let limit = limit.clamp(1, MAX_KLINES_LIMIT);

        if symbol.ends_with(LIVE_QUOTE_SUFFIX) {
            match self.upstream.klines(symbol, timeframe, limit).await {
                Ok(candles) if !candles.is_empty() => return candles,
                Ok(_) => debug!(symbol, "upstream returned no candles, using simulation"),
                Err(e) => {
                    debug!(symbol, error = %e, "live candles unavailable, using simulation");
                }
            }
        }

        let seed = self.current_price(Some(symbol)).await;
        sim::synthetic_candles(seed, timeframe, limit)
    }

    /// Prices for every pair, keyed by pair id. Prefers one batched
    /// upstream call; pairs missing from the batch (or the whole batch on
    /// failure) fall back to per-symbol lookups.
    pub async fn all_prices(&self, pairs: &[TradingPair]) -> HashMap<i64, f64> {
        let batch = match self.upstream.all_ticker_prices().await {
            Ok(map) => map,
            Err(e) => {
                debug!(error = %e, "bulk price fetch failed, falling back per symbol");
                HashMap::new()
            }
        };

        let mut out = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let price = match batch.get(&pair.symbol) {
                Some(p) => *p,
                None => self.current_price(Some(&pair.symbol)).await,
            };
            out.insert(pair.id, price);
        }
        out
    }
}
