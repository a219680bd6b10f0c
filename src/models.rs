use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a binary-options bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Round lifecycle: active until settled, finished forever after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Active,
    Finished,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "active",
            RoundStatus::Finished => "finished",
        }
    }
}

/// Candle timeframes supported by the chart endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            _ => None,
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3600,
        }
    }

    /// Interval vocabulary of the upstream klines API.
    pub fn upstream_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub account_type: String,
    pub balance: f64,
}

/// A freshly opened round, echoed back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedRound {
    pub id: i64,
    pub pair_id: i64,
    pub direction: Direction,
    pub amount: f64,
    pub duration: i64,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    pub start_price: f64,
    pub symbol: String,
    pub name: String,
    pub status: RoundStatus,
}

/// An active round joined with its pair, as listed for the client.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRound {
    pub id: i64,
    pub pair_id: i64,
    pub direction: Direction,
    pub amount: f64,
    pub duration: i64,
    pub start_time: i64,
    /// Epoch milliseconds, always absolute. Clients compute remaining time
    /// themselves, so this must never be a relative duration.
    pub end_time: i64,
    pub start_price: f64,
    pub symbol: String,
    pub name: String,
}

/// A round due for settlement, as snapshotted by the sweep.
#[derive(Debug, Clone)]
pub struct DueRound {
    pub id: i64,
    pub user_id: i64,
    /// `None` for rounds written before the accounts migration; settlement
    /// resolves these to the user's demo account.
    pub account_id: Option<i64>,
    pub pair_id: i64,
    pub direction: Direction,
    pub amount: f64,
    pub start_price: f64,
    pub end_time: i64,
    pub symbol: String,
    pub name: String,
}

/// One OHLC sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    /// Epoch seconds, candle open time.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Payload of the `round_finished` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundFinished {
    pub round_id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub win: bool,
    pub profit: f64,
    pub amount: f64,
    pub direction: Direction,
    pub symbol: String,
    pub name: String,
    pub start_price: f64,
    pub end_price: f64,
    pub new_balance: f64,
}

/// Events pushed to every connected websocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsServerEvent {
    ServerTime {
        time: String,
        timestamp: f64,
        formatted: String,
    },
    PriceUpdate {
        pair_id: i64,
        price: f64,
        timestamp: f64,
    },
    RoundFinished(RoundFinished),
    TestResponse {
        message: String,
    },
}

impl WsServerEvent {
    pub fn server_time(now: DateTime<Utc>) -> Self {
        WsServerEvent::ServerTime {
            time: now.to_rfc3339(),
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            formatted: now.format("%H:%M:%S").to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub http_timeout_secs: u64,
    pub time_tick_secs: u64,
    pub price_tick_secs: u64,
    pub sweep_interval_secs: u64,
    pub default_demo_balance: f64,
    pub catalog_max_pairs: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./optionbot.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "5500".to_string())
            .parse()
            .unwrap_or(5500);

        let upstream_base_url = std::env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        let http_timeout_secs = std::env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let time_tick_secs = std::env::var("TIME_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        let price_tick_secs = std::env::var("PRICE_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(2);

        let sweep_interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        let default_demo_balance = std::env::var("DEFAULT_DEMO_BALANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &f64| v.is_finite() && *v >= 0.0)
            .unwrap_or(10_000.0);

        let catalog_max_pairs = std::env::var("CATALOG_MAX_PAIRS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(30);

        Self {
            database_path,
            port,
            upstream_base_url,
            http_timeout_secs,
            time_tick_secs,
            price_tick_secs,
            sweep_interval_secs,
            default_demo_balance,
            catalog_max_pairs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::parse("UP"), Some(Direction::Up));
        assert_eq!(Direction::parse("DOWN"), Some(Direction::Down));
        assert_eq!(Direction::parse("SIDEWAYS"), None);
        assert_eq!(Direction::Up.as_str(), "UP");
    }

    #[test]
    fn test_timeframe_parse_and_spacing() {
        assert_eq!(Timeframe::parse("1m"), Some(Timeframe::M1));
        assert_eq!(Timeframe::parse("1h"), Some(Timeframe::H1));
        assert_eq!(Timeframe::parse("4h"), None);
        assert_eq!(Timeframe::M5.seconds(), 300);
        assert_eq!(Timeframe::M15.upstream_interval(), "15m");
    }

    #[test]
    fn test_ws_event_wire_shape() {
        let event = WsServerEvent::PriceUpdate {
            pair_id: 3,
            price: 65000.5,
            timestamp: 1_700_000_000.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "price_update");
        assert_eq!(json["data"]["pair_id"], 3);
    }
}
