//! Trading-pair catalog: synced from the upstream exchange info, with a
//! fixed default list when the upstream is unreachable.

use tracing::{info, warn};

use crate::{
    error::ApiError,
    feed::binance::{BinanceClient, SymbolInfo},
    store::TradingDb,
};

/// Flagship symbol, always listed first when present.
const FLAGSHIP: &str = "BTCUSDT";

const QUOTE_SUFFIX: &str = "USDT";

/// Popular base assets, prioritised over the long tail.
const POPULAR_BASES: &[&str] = &[
    "BTC", "ETH", "BNB", "SOL", "ADA", "XRP", "DOT", "DOGE", "MATIC", "AVAX", "LINK", "UNI",
    "LTC", "ATOM", "ETC",
];

const DEFAULT_PAIRS: &[(&str, &str)] = &[
    ("BTCUSDT", "Bitcoin"),
    ("ETHUSDT", "Ethereum"),
    ("BNBUSDT", "Binance Coin"),
    ("SOLUSDT", "Solana"),
    ("ADAUSDT", "Cardano"),
];

/// Human display name for a base asset.
fn format_pair_name(base: &str) -> String {
    match base {
        "BTC" => "Bitcoin",
        "ETH" => "Ethereum",
        "BNB" => "Binance Coin",
        "SOL" => "Solana",
        "ADA" => "Cardano",
        "XRP" => "Ripple",
        "DOT" => "Polkadot",
        "DOGE" => "Dogecoin",
        "MATIC" => "Polygon",
        "AVAX" => "Avalanche",
        "LINK" => "Chainlink",
        "UNI" => "Uniswap",
        "LTC" => "Litecoin",
        "ATOM" => "Cosmos",
        "ETC" => "Ethereum Classic",
        other => return other.to_string(),
    }
    .to_string()
}

/// Pick the catalog from the upstream symbol list: tradable USDT pairs
/// only, flagship first, popular bases next, long tail capped so the total
/// stays within `max_pairs`.
pub fn select_pairs(symbols: &[SymbolInfo], max_pairs: usize) -> Vec<(String, String)> {
    let mut flagship: Option<(String, String)> = None;
    let mut popular: Vec<(String, String)> = Vec::new();
    let mut other: Vec<(String, String)> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for info in symbols {
        if info.status != "TRADING" || !info.symbol.ends_with(QUOTE_SUFFIX) {
            continue;
        }
        if !seen.insert(info.symbol.clone()) {
            continue;
        }

        let base = info.symbol.trim_end_matches(QUOTE_SUFFIX);
        let entry = (info.symbol.clone(), format_pair_name(base));

        if info.symbol == FLAGSHIP {
            flagship = Some(entry);
        } else if POPULAR_BASES.contains(&base) {
            popular.push(entry);
        } else {
            other.push(entry);
        }
    }

    let mut out = Vec::with_capacity(max_pairs);
    if let Some(f) = flagship {
        out.push(f);
    }
    out.extend(popular);
    for entry in other {
        if out.len() >= max_pairs {
            break;
        }
        out.push(entry);
    }
    out.truncate(max_pairs);
    out
}

fn default_pairs() -> Vec<(String, String)> {
    DEFAULT_PAIRS
        .iter()
        .map(|(s, n)| (s.to_string(), n.to_string()))
        .collect()
}

/// Fetch the upstream catalog and replace the stored pairs; defaults on any
/// upstream failure. Returns the number of pairs stored.
pub async fn sync_catalog(
    db: &TradingDb,
    upstream: &BinanceClient,
    max_pairs: usize,
) -> Result<usize, ApiError> {
    let pairs = match upstream.exchange_info().await {
        Ok(info) => {
            let selected = select_pairs(&info.symbols, max_pairs);
            if selected.is_empty() {
                warn!("exchange info held no tradable pairs, using defaults");
                default_pairs()
            } else {
                selected
            }
        }
        Err(e) => {
            warn!("exchange info unavailable ({e:#}), using default pairs");
            default_pairs()
        }
    };

    let count = db.replace_pairs(&pairs).await?;
    info!("📈 Catalog synced: {} trading pairs", count);
    Ok(count)
}

/// Startup seeding: only sync when the catalog is empty.
pub async fn seed_catalog_if_empty(
    db: &TradingDb,
    upstream: &BinanceClient,
    max_pairs: usize,
) -> Result<(), ApiError> {
    if db.count_pairs().await? == 0 {
        sync_catalog(db, upstream, max_pairs).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(symbol: &str, status: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_select_filters_status_and_quote() {
        let symbols = vec![
            sym("ETHUSDT", "TRADING"),
            sym("ETHBTC", "TRADING"),
            sym("LUNAUSDT", "BREAK"),
        ];
        let pairs = select_pairs(&symbols, 30);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "ETHUSDT");
        assert_eq!(pairs[0].1, "Ethereum");
    }

    #[test]
    fn test_flagship_always_first() {
        let symbols = vec![
            sym("ZENUSDT", "TRADING"),
            sym("ETHUSDT", "TRADING"),
            sym("BTCUSDT", "TRADING"),
        ];
        let pairs = select_pairs(&symbols, 30);
        assert_eq!(pairs[0].0, "BTCUSDT");
        assert_eq!(pairs[1].0, "ETHUSDT");
    }

    #[test]
    fn test_popular_before_long_tail_and_cap() {
        let mut symbols: Vec<SymbolInfo> = (0..60)
            .map(|i| sym(&format!("TOKEN{i}USDT"), "TRADING"))
            .collect();
        symbols.push(sym("SOLUSDT", "TRADING"));
        symbols.push(sym("BTCUSDT", "TRADING"));

        let pairs = select_pairs(&symbols, 30);
        assert_eq!(pairs.len(), 30);
        assert_eq!(pairs[0].0, "BTCUSDT");
        assert_eq!(pairs[1].0, "SOLUSDT");
    }

    #[test]
    fn test_duplicates_dropped() {
        let symbols = vec![sym("ETHUSDT", "TRADING"), sym("ETHUSDT", "TRADING")];
        assert_eq!(select_pairs(&symbols, 30).len(), 1);
    }

    #[test]
    fn test_long_tail_keeps_raw_base_name() {
        let symbols = vec![sym("PEPEUSDT", "TRADING")];
        let pairs = select_pairs(&symbols, 30);
        assert_eq!(pairs[0].1, "PEPE");
    }
}
