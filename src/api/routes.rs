//! JSON API: pairs, accounts, rounds, prices, chart data, admin settings.
//!
//! Validation errors surface directly to the client; upstream market-data
//! failures never do (the price source absorbs them).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    error::ApiError,
    models::{Account, ActiveRound, Candle, Direction, OpenedRound, Timeframe, TradingPair},
    AppState,
};

const DEFAULT_USER_ID: i64 = 1;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<i64>,
}

impl UserQuery {
    fn user_id(&self) -> i64 {
        self.user_id.unwrap_or(DEFAULT_USER_ID)
    }
}

// ---- trading pairs ------------------------------------------------------

pub async fn get_pairs(
    State(state): State<AppState>,
) -> Result<Json<Vec<TradingPair>>, ApiError> {
    Ok(Json(state.db.list_active_pairs().await?))
}

#[derive(Debug, Deserialize)]
pub struct AddPairRequest {
    pub symbol: Option<String>,
    pub name: Option<String>,
}

pub async fn add_pair(
    State(state): State<AppState>,
    Json(req): Json<AddPairRequest>,
) -> Result<(StatusCode, Json<TradingPair>), ApiError> {
    let symbol = req
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("Symbol and name are required"))?;
    let name = req
        .name
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("Symbol and name are required"))?;

    let pair = state.db.insert_pair(symbol.trim(), name.trim()).await?;
    Ok((StatusCode::CREATED, Json(pair)))
}

#[derive(Debug, Serialize)]
pub struct SyncPairsResponse {
    pub message: String,
    pub count: usize,
    pub pairs: Vec<TradingPair>,
}

pub async fn sync_pairs(
    State(state): State<AppState>,
) -> Result<Json<SyncPairsResponse>, ApiError> {
    let count = crate::catalog::sync_catalog(
        &state.db,
        state.prices.upstream(),
        state.config.catalog_max_pairs,
    )
    .await?;
    let pairs = state.db.list_active_pairs().await?;
    Ok(Json(SyncPairsResponse {
        message: "Pairs synchronized successfully".to_string(),
        count,
        pairs,
    }))
}

// ---- accounts -----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: f64,
}

/// Legacy single-balance view: the demo account.
pub async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let accounts = state.db.get_or_create_accounts(query.user_id()).await?;
    let demo = accounts
        .iter()
        .find(|a| a.account_type == crate::store::DEMO_ACCOUNT)
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(BalanceResponse {
        balance: demo.balance,
    }))
}

pub async fn get_accounts(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(state.db.get_or_create_accounts(query.user_id()).await?))
}

// ---- rounds -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRoundRequest {
    pub user_id: Option<i64>,
    pub pair_id: Option<i64>,
    pub direction: Option<String>,
    pub amount: Option<f64>,
    pub duration: Option<i64>,
}

pub async fn create_round(
    State(state): State<AppState>,
    Json(req): Json<CreateRoundRequest>,
) -> Result<(StatusCode, Json<OpenedRound>), ApiError> {
    let user_id = req.user_id.unwrap_or(DEFAULT_USER_ID);
    let pair_id = req
        .pair_id
        .ok_or_else(|| ApiError::invalid("Missing required fields"))?;
    let direction = req
        .direction
        .as_deref()
        .ok_or_else(|| ApiError::invalid("Missing required fields"))?;
    let amount = req
        .amount
        .ok_or_else(|| ApiError::invalid("Missing required fields"))?;
    let duration = req
        .duration
        .ok_or_else(|| ApiError::invalid("Missing required fields"))?;

    let direction = Direction::parse(direction)
        .ok_or_else(|| ApiError::invalid("Direction must be UP or DOWN"))?;

    let pair = state
        .db
        .get_pair(pair_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Trading pair not found"))?;

    // Capture the start price before touching any state.
    let start_price = state.prices.current_price(Some(&pair.symbol)).await;
    let now_ms = Utc::now().timestamp_millis();

    let round = state
        .db
        .open_round(user_id, pair_id, direction, amount, duration, start_price, now_ms)
        .await?;

    Ok((StatusCode::CREATED, Json(round)))
}

pub async fn get_active_rounds(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<ActiveRound>>, ApiError> {
    Ok(Json(state.db.list_active_rounds(query.user_id()).await?))
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub round_id: i64,
    pub win: bool,
    pub profit: f64,
    pub new_balance: f64,
}

/// Settlement trigger. The body carries nothing that influences the
/// outcome; the server decides win/loss and payout itself.
pub async fn settle_round(
    State(state): State<AppState>,
    Path(round_id): Path<i64>,
) -> Result<Json<SettleResponse>, ApiError> {
    let now_ms = Utc::now().timestamp_millis();
    let outcome = state.engine.settle_now(round_id, now_ms).await?;
    Ok(Json(SettleResponse {
        round_id: outcome.round_id,
        win: outcome.win,
        profit: outcome.profit,
        new_balance: outcome.new_balance,
    }))
}

// ---- prices -------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub pair_id: i64,
    pub price: f64,
    pub timestamp: f64,
    pub formatted: String,
}

pub async fn get_price(
    State(state): State<AppState>,
    Path(pair_id): Path<i64>,
) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = state.db.get_pair(pair_id).await?.map(|p| p.symbol);
    let price = state.prices.current_price(symbol.as_deref()).await;
    let now = Utc::now();
    Ok(Json(PriceResponse {
        pair_id,
        price,
        timestamp: now.timestamp_millis() as f64 / 1000.0,
        formatted: now.format("%H:%M:%S").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PairPrice {
    pub symbol: String,
    pub price: f64,
    pub timestamp: f64,
}

pub async fn get_all_prices(
    State(state): State<AppState>,
) -> Result<Json<HashMap<i64, PairPrice>>, ApiError> {
    let pairs = state.db.list_active_pairs().await?;
    let prices = state.prices.all_prices(&pairs).await;
    let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;

    let out = pairs
        .into_iter()
        .filter_map(|pair| {
            let price = *prices.get(&pair.id)?;
            Some((
                pair.id,
                PairPrice {
                    symbol: pair.symbol,
                    price,
                    timestamp,
                },
            ))
        })
        .collect();
    Ok(Json(out))
}

// ---- chart data ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub timeframe: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_chart_data(
    State(state): State<AppState>,
    Path(pair_id): Path<i64>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Vec<Candle>>, ApiError> {
    let timeframe = match query.timeframe.as_deref() {
        None => Timeframe::M1,
        Some(s) => Timeframe::parse(s)
            .ok_or_else(|| ApiError::invalid("timeframe must be one of 1m, 5m, 15m, 1h"))?,
    };
    let limit = query.limit.unwrap_or(100);

    let pair = state
        .db
        .get_pair(pair_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Trading pair not found"))?;

    let candles = state.prices.chart_data(&pair.symbol, timeframe, limit).await;
    Ok(Json(candles))
}

// ---- server time & admin ------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ServerTimeResponse {
    pub time: String,
    pub timestamp: f64,
    pub formatted: String,
}

pub async fn get_server_time() -> Json<ServerTimeResponse> {
    let now = Utc::now();
    Json(ServerTimeResponse {
        time: now.to_rfc3339(),
        timestamp: now.timestamp_millis() as f64 / 1000.0,
        formatted: now.format("%H:%M:%S").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct WinRateResponse {
    pub win_rate: i64,
}

pub async fn get_win_rate(
    State(state): State<AppState>,
) -> Result<Json<WinRateResponse>, ApiError> {
    Ok(Json(WinRateResponse {
        win_rate: state.db.win_rate().await?,
    }))
}

pub async fn set_win_rate(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<WinRateResponse>, ApiError> {
    let raw = body
        .get("win_rate")
        .ok_or_else(|| ApiError::invalid("win_rate is required"))?;
    let win_rate = raw
        .as_i64()
        .ok_or_else(|| ApiError::invalid("win_rate must be a number"))?;

    state.db.set_win_rate(win_rate).await?;
    Ok(Json(WinRateResponse { win_rate }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
