//! Simulated binary-options trading backend.
//!
//! A user stakes an amount on a direction (up/down) for a fixed duration;
//! the server settles the round against a live or simulated reference
//! price, with the outcome probability governed by a configurable win
//! rate. Exposes a JSON API plus a websocket event stream.

pub mod api;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod feed;
pub mod models;
pub mod store;
pub mod ws;

use tokio::sync::broadcast;

use crate::{
    engine::SettlementEngine, feed::PriceSource, models::Config, models::WsServerEvent,
    store::TradingDb, ws::SubscriberRegistry,
};

/// Application state shared across all request handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: TradingDb,
    pub prices: PriceSource,
    pub engine: SettlementEngine,
    pub events: broadcast::Sender<WsServerEvent>,
    pub subscribers: SubscriberRegistry,
}
