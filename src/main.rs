use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use optionbot_backend::{
    api, catalog,
    engine::SettlementEngine,
    feed::{BinanceClient, PriceSource},
    models::{Config, WsServerEvent},
    store::TradingDb,
    ws, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,optionbot_backend=debug".into()),
        )
        .init();

    let config = Config::from_env();
    info!("🚀 Starting optionbot backend on port {}", config.port);

    let db = TradingDb::new(&config.database_path, config.default_demo_balance)?;
    info!("💾 Database ready at {}", config.database_path);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;
    let upstream = BinanceClient::new(http, config.upstream_base_url.clone());
    let prices = PriceSource::new(upstream.clone());

    // First boot only; an existing catalog is left as the operator set it.
    if let Err(e) = catalog::seed_catalog_if_empty(&db, &upstream, config.catalog_max_pairs).await {
        warn!("catalog seeding failed: {}", e);
    }

    let (events, _) = broadcast::channel::<WsServerEvent>(256);
    let engine = SettlementEngine::new(db.clone(), prices.clone(), events.clone());

    let state = AppState {
        config: config.clone(),
        db,
        prices,
        engine: engine.clone(),
        events: events.clone(),
        subscribers: ws::SubscriberRegistry::default(),
    };

    spawn_time_tick(events.clone(), config.time_tick_secs);
    spawn_price_tick(state.clone(), config.price_tick_secs);
    tokio::spawn(engine.run(config.sweep_interval_secs));

    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/server-time", get(api::get_server_time))
        .route("/api/pairs", get(api::get_pairs).post(api::add_pair))
        .route("/api/pairs/sync", post(api::sync_pairs))
        .route("/api/balance", get(api::get_balance))
        .route("/api/accounts", get(api::get_accounts))
        .route("/api/rounds", post(api::create_round))
        .route("/api/rounds/active", get(api::get_active_rounds))
        .route("/api/rounds/:round_id/settle", post(api::settle_round))
        .route("/api/price/:pair_id", get(api::get_price))
        .route("/api/prices", get(api::get_all_prices))
        .route("/api/chart-data/:pair_id", get(api::get_chart_data))
        .route(
            "/api/admin/win-rate",
            get(api::get_win_rate).post(api::set_win_rate),
        )
        .route("/ws", get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Broadcast the server clock every tick so clients stay in sync with
/// round countdowns.
fn spawn_time_tick(events: broadcast::Sender<WsServerEvent>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let _ = events.send(WsServerEvent::server_time(Utc::now()));
        }
    });
}

/// Broadcast a price update per active pair every tick. Skipped entirely
/// while nobody is connected.
fn spawn_price_tick(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if state.subscribers.is_empty() {
                continue;
            }

            let pairs = match state.db.list_active_pairs().await {
                Ok(pairs) => pairs,
                Err(e) => {
                    warn!("price tick could not list pairs: {}", e);
                    continue;
                }
            };
            if pairs.is_empty() {
                continue;
            }

            let prices = state.prices.all_prices(&pairs).await;
            let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
            for (pair_id, price) in prices {
                let _ = state.events.send(WsServerEvent::PriceUpdate {
                    pair_id,
                    price,
                    timestamp,
                });
            }
        }
    });
}
