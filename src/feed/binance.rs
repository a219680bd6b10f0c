//! Binance REST client.
//!
//! Every call is bounded by the shared client timeout; callers treat any
//! error as "source unavailable" and fall back to simulation.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

use crate::models::{Candle, Timeframe};

/// Upstream cap on a single klines request.
pub const MAX_KLINES_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Current price of a single symbol.
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64> {
        let resp = self
            .client
            .get(self.url("/api/v3/ticker/price"))
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("GET /api/v3/ticker/price failed")?
            .error_for_status()
            .context("ticker price request rejected")?;

        let ticker: TickerPrice = resp.json().await.context("parse ticker price")?;
        ticker
            .price
            .parse::<f64>()
            .context("ticker price not a number")
    }

    /// All spot prices in one batched call.
    pub async fn all_ticker_prices(&self) -> Result<HashMap<String, f64>> {
        let resp = self
            .client
            .get(self.url("/api/v3/ticker/price"))
            .send()
            .await
            .context("GET /api/v3/ticker/price (bulk) failed")?
            .error_for_status()
            .context("bulk ticker request rejected")?;

        let tickers: Vec<TickerPrice> = resp.json().await.context("parse bulk tickers")?;
        Ok(tickers
            .into_iter()
            .filter_map(|t| t.price.parse::<f64>().ok().map(|p| (t.symbol, p)))
            .collect())
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        let resp = self
            .client
            .get(self.url("/api/v3/exchangeInfo"))
            .send()
            .await
            .context("GET /api/v3/exchangeInfo failed")?
            .error_for_status()
            .context("exchange info request rejected")?;

        resp.json().await.context("parse exchange info")
    }

    /// OHLC candles. Rows come back as heterogeneous JSON arrays:
    /// [open_time_ms, "open", "high", "low", "close", ...].
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = limit.min(MAX_KLINES_LIMIT);
        let resp = self
            .client
            .get(self.url("/api/v3/klines"))
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.upstream_interval()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("GET /api/v3/klines failed")?
            .error_for_status()
            .context("klines request rejected")?;

        let rows: Vec<Vec<serde_json::Value>> = resp.json().await.context("parse klines")?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(candle) = parse_kline_row(&row) else {
                continue;
            };
            candles.push(candle);
        }
        Ok(candles)
    }
}

fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    let time_ms = row.first()?.as_i64()?;
    let field = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();
    Some(Candle {
        time: time_ms / 1000,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = vec![
            json!(1_700_000_000_000i64),
            json!("65000.1"),
            json!("65100.2"),
            json!("64900.3"),
            json!("65050.4"),
            json!("12.3"),
        ];
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.time, 1_700_000_000);
        assert_eq!(candle.open, 65000.1);
        assert_eq!(candle.high, 65100.2);
        assert_eq!(candle.low, 64900.3);
        assert_eq!(candle.close, 65050.4);
    }

    #[test]
    fn test_parse_kline_row_rejects_garbage() {
        assert!(parse_kline_row(&[json!("not-a-time")]).is_none());
        assert!(parse_kline_row(&[]).is_none());
    }
}
