//! SQLite persistence: users, accounts, trading pairs, rounds, results,
//! settings.
//!
//! One connection behind a mutex. Every multi-statement mutation (open a
//! round, settle a round, create the account pair) runs in a single
//! transaction, so a balance check can never race a debit and a round can
//! never be settled twice.

use crate::{
    error::ApiError,
    models::{Account, ActiveRound, Direction, DueRound, OpenedRound, RoundStatus, TradingPair},
};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const DEMO_ACCOUNT: &str = "demo";
pub const REAL_ACCOUNT: &str = "real";

const DEFAULT_WIN_RATE: i64 = 50;

#[derive(Clone)]
pub struct TradingDb {
    conn: Arc<Mutex<Connection>>,
    default_demo_balance: f64,
}

impl TradingDb {
    pub fn new(db_path: &str, default_demo_balance: f64) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open trading db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                balance REAL DEFAULT 10000.0,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                account_type TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0.0,
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, account_type),
                FOREIGN KEY (user_id) REFERENCES users(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trading_pairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                account_id INTEGER,
                pair_id INTEGER NOT NULL,
                direction TEXT NOT NULL,
                amount REAL NOT NULL,
                duration INTEGER NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                start_price REAL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (account_id) REFERENCES accounts(id),
                FOREIGN KEY (pair_id) REFERENCES trading_pairs(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS round_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_id INTEGER UNIQUE NOT NULL,
                win INTEGER NOT NULL,
                profit REAL NOT NULL,
                end_price REAL NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        // Additive migration for databases created before accounts existed.
        // The ALTER fails when the column is already present.
        conn.execute("ALTER TABLE rounds ADD COLUMN account_id INTEGER", [])
            .ok();
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_status_end ON rounds(status, end_time)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_account_id ON rounds(account_id)",
            [],
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            default_demo_balance,
        };
        db.seed()?;
        Ok(db)
    }

    /// Seed the initial user and the win-rate setting, once.
    fn seed(&self) -> anyhow::Result<()> {
        let conn = self
            .conn
            .try_lock()
            .map_err(|_| anyhow::anyhow!("database locked during startup seeding"))?;

        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if users == 0 {
            conn.execute(
                "INSERT INTO users (balance, created_at) VALUES (?1, ?2)",
                params![self.default_demo_balance, now_ms()],
            )?;
            info!("👤 Seeded default user with balance {}", self.default_demo_balance);
        }

        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('win_rate', ?1)",
            params![DEFAULT_WIN_RATE.to_string()],
        )?;

        Ok(())
    }

    // ---- accounts -------------------------------------------------------

    /// Return the user's accounts, creating the demo/real pair on first
    /// access. The demo account is seeded from the user's legacy balance
    /// (or the configured default), the real account starts at zero.
    pub async fn get_or_create_accounts(&self, user_id: i64) -> Result<Vec<Account>, ApiError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(ApiError::from)?;
        let accounts = ensure_accounts(&tx, user_id, self.default_demo_balance)?;
        tx.commit().map_err(ApiError::from)?;
        Ok(accounts)
    }

    pub async fn account_balance(&self, account_id: i64) -> Result<f64, ApiError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT balance FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| ApiError::not_found("Account not found"))
    }

    // ---- trading pairs --------------------------------------------------

    pub async fn list_active_pairs(&self) -> Result<Vec<TradingPair>, ApiError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, symbol, name, active FROM trading_pairs WHERE active = 1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TradingPair {
                id: row.get(0)?,
                symbol: row.get(1)?,
                name: row.get(2)?,
                active: row.get::<_, i64>(3)? != 0,
            })
        })?;
        Ok(collect_rows(rows, "trading pair"))
    }

    pub async fn get_pair(&self, pair_id: i64) -> Result<Option<TradingPair>, ApiError> {
        let conn = self.conn.lock().await;
        let pair = conn
            .query_row(
                "SELECT id, symbol, name, active FROM trading_pairs WHERE id = ?1",
                params![pair_id],
                |row| {
                    Ok(TradingPair {
                        id: row.get(0)?,
                        symbol: row.get(1)?,
                        name: row.get(2)?,
                        active: row.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(pair)
    }

    pub async fn insert_pair(&self, symbol: &str, name: &str) -> Result<TradingPair, ApiError> {
        let conn = self.conn.lock().await;
        match conn.execute(
            "INSERT INTO trading_pairs (symbol, name) VALUES (?1, ?2)",
            params![symbol, name],
        ) {
            Ok(_) => Ok(TradingPair {
                id: conn.last_insert_rowid(),
                symbol: symbol.to_string(),
                name: name.to_string(),
                active: true,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ApiError::invalid("Pair already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the whole catalog atomically (used by the sync operation).
    pub async fn replace_pairs(&self, pairs: &[(String, String)]) -> Result<usize, ApiError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(ApiError::from)?;
        tx.execute("DELETE FROM trading_pairs", [])?;
        for (symbol, name) in pairs {
            tx.execute(
                "INSERT OR IGNORE INTO trading_pairs (symbol, name) VALUES (?1, ?2)",
                params![symbol, name],
            )?;
        }
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM trading_pairs", [], |row| row.get(0))?;
        tx.commit().map_err(ApiError::from)?;
        Ok(count as usize)
    }

    pub async fn count_pairs(&self) -> Result<usize, ApiError> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM trading_pairs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ---- rounds ---------------------------------------------------------

    /// Open a round: validate, capture the stake and insert the round in
    /// one transaction. The start price is captured by the caller before
    /// this call (the debit must not wait on the network).
    pub async fn open_round(
        &self,
        user_id: i64,
        pair_id: i64,
        direction: Direction,
        amount: f64,
        duration_secs: i64,
        start_price: f64,
        now_ms: i64,
    ) -> Result<OpenedRound, ApiError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ApiError::invalid("amount must be positive"));
        }
        if duration_secs <= 0 {
            return Err(ApiError::invalid("duration must be positive"));
        }
        let end_time = duration_secs
            .checked_mul(1000)
            .and_then(|ms| now_ms.checked_add(ms))
            .ok_or_else(|| ApiError::invalid("duration too large"))?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(ApiError::from)?;

        let pair: Option<(String, String)> = tx
            .query_row(
                "SELECT symbol, name FROM trading_pairs WHERE id = ?1 AND active = 1",
                params![pair_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((symbol, name)) = pair else {
            return Err(ApiError::not_found("Trading pair not found"));
        };

        let accounts = ensure_accounts(&tx, user_id, self.default_demo_balance)?;
        let demo = accounts
            .iter()
            .find(|a| a.account_type == DEMO_ACCOUNT)
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("demo account missing")))?;

        if demo.balance < amount {
            return Err(ApiError::InsufficientFunds);
        }

        tx.execute(
            "UPDATE accounts SET balance = balance - ?1 WHERE id = ?2",
            params![amount, demo.id],
        )?;
        tx.execute(
            "INSERT INTO rounds (user_id, account_id, pair_id, direction, amount, duration, \
             start_time, end_time, status, start_price) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9)",
            params![
                user_id,
                demo.id,
                pair_id,
                direction.as_str(),
                amount,
                duration_secs,
                now_ms,
                end_time,
                start_price,
            ],
        )?;
        let round_id = tx.last_insert_rowid();
        tx.commit().map_err(ApiError::from)?;

        Ok(OpenedRound {
            id: round_id,
            pair_id,
            direction,
            amount,
            duration: duration_secs,
            start_time: now_ms,
            end_time,
            start_price,
            symbol,
            name,
            status: RoundStatus::Active,
        })
    }

    /// Active rounds for a user, most recent first, joined with the pair.
    pub async fn list_active_rounds(&self, user_id: i64) -> Result<Vec<ActiveRound>, ApiError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT r.id, r.pair_id, r.direction, r.amount, r.duration, r.start_time, \
                    r.end_time, r.start_price, tp.symbol, tp.name \
             FROM rounds r JOIN trading_pairs tp ON r.pair_id = tp.id \
             WHERE r.user_id = ?1 AND r.status = 'active' \
             ORDER BY r.start_time DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let direction: String = row.get(2)?;
            Ok(ActiveRound {
                id: row.get(0)?,
                pair_id: row.get(1)?,
                direction: Direction::parse(&direction).unwrap_or(Direction::Up),
                amount: row.get(3)?,
                duration: row.get(4)?,
                start_time: row.get(5)?,
                end_time: row.get(6)?,
                start_price: row.get(7)?,
                symbol: row.get(8)?,
                name: row.get(9)?,
            })
        })?;
        Ok(collect_rows(rows, "active round"))
    }

    /// One consistent snapshot of every active round past its end time.
    pub async fn due_rounds(&self, now_ms: i64) -> Result<Vec<DueRound>, ApiError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT r.id, r.user_id, r.account_id, r.pair_id, r.direction, r.amount, \
                    r.start_price, r.end_time, tp.symbol, tp.name \
             FROM rounds r JOIN trading_pairs tp ON r.pair_id = tp.id \
             WHERE r.status = 'active' AND r.end_time <= ?1",
        )?;
        let rows = stmt.query_map(params![now_ms], map_due_round)?;
        Ok(collect_rows(rows, "due round"))
    }

    /// Fetch a single active round (settlement trigger path).
    pub async fn get_active_round(&self, round_id: i64) -> Result<DueRound, ApiError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT r.id, r.user_id, r.account_id, r.pair_id, r.direction, r.amount, \
                    r.start_price, r.end_time, tp.symbol, tp.name \
             FROM rounds r JOIN trading_pairs tp ON r.pair_id = tp.id \
             WHERE r.id = ?1 AND r.status = 'active'",
            params![round_id],
            map_due_round,
        )
        .optional()?
        .ok_or_else(|| ApiError::not_found("Round not found or already finished"))
    }

    /// Record the outcome: flip status, insert the result and apply the win
    /// credit in one transaction. Returns the settled account id and its
    /// new balance.
    ///
    /// The status flip is guarded by `status = 'active'`, so a second
    /// settlement attempt touches zero rows and is rejected as NotFound.
    pub async fn settle_round(
        &self,
        round_id: i64,
        win: bool,
        profit: f64,
        end_price: f64,
    ) -> Result<(i64, f64), ApiError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(ApiError::from)?;

        let flipped = tx.execute(
            "UPDATE rounds SET status = 'finished' WHERE id = ?1 AND status = 'active'",
            params![round_id],
        )?;
        if flipped == 0 {
            return Err(ApiError::not_found("Round not found or already finished"));
        }

        let (user_id, account_id, amount): (i64, Option<i64>, f64) = tx.query_row(
            "SELECT user_id, account_id, amount FROM rounds WHERE id = ?1",
            params![round_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        // Rounds written before the account_id migration settle against the
        // user's demo account; backfill the row so the resolution sticks.
        let account_id = match account_id {
            Some(id) => id,
            None => {
                let accounts = ensure_accounts(&tx, user_id, self.default_demo_balance)?;
                let demo = accounts
                    .iter()
                    .find(|a| a.account_type == DEMO_ACCOUNT)
                    .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("demo account missing")))?;
                tx.execute(
                    "UPDATE rounds SET account_id = ?1 WHERE id = ?2",
                    params![demo.id, round_id],
                )?;
                demo.id
            }
        };

        tx.execute(
            "INSERT INTO round_results (round_id, win, profit, end_price) VALUES (?1, ?2, ?3, ?4)",
            params![round_id, win as i64, profit, end_price],
        )?;

        if win {
            // Stake was debited at open time; return it together with the profit.
            tx.execute(
                "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2",
                params![amount + profit, account_id],
            )?;
        }

        let new_balance: f64 = tx.query_row(
            "SELECT balance FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        tx.commit().map_err(ApiError::from)?;

        Ok((account_id, new_balance))
    }

    // ---- settings -------------------------------------------------------

    pub async fn win_rate(&self) -> Result<i64, ApiError> {
        let conn = self.conn.lock().await;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'win_rate'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WIN_RATE))
    }

    pub async fn set_win_rate(&self, win_rate: i64) -> Result<(), ApiError> {
        if !(0..=100).contains(&win_rate) {
            return Err(ApiError::invalid("win_rate must be between 0 and 100"));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('win_rate', ?1)",
            params![win_rate.to_string()],
        )?;
        Ok(())
    }
}

/// Collect mapped rows, logging any row that fails to map instead of
/// silently dropping it.
fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Vec<T> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(r) => out.push(r),
            Err(e) => warn!("skipping unreadable {} row: {}", what, e),
        }
    }
    out
}

fn map_due_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<DueRound> {
    let direction: String = row.get(4)?;
    Ok(DueRound {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        pair_id: row.get(3)?,
        direction: Direction::parse(&direction).unwrap_or(Direction::Up),
        amount: row.get(5)?,
        start_price: row.get(6)?,
        end_time: row.get(7)?,
        symbol: row.get(8)?,
        name: row.get(9)?,
    })
}

/// Fetch the user's accounts inside an open transaction, creating the
/// demo/real pair when absent.
fn ensure_accounts(
    tx: &Transaction<'_>,
    user_id: i64,
    default_demo_balance: f64,
) -> Result<Vec<Account>, ApiError> {
    let mut stmt = tx.prepare_cached(
        "SELECT id, user_id, account_type, balance FROM accounts \
         WHERE user_id = ?1 ORDER BY account_type ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Account {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_type: row.get(2)?,
            balance: row.get(3)?,
        })
    })?;
    let existing = collect_rows(rows, "account");
    drop(stmt);

    if !existing.is_empty() {
        return Ok(existing);
    }

    // Seed the demo account from the user's legacy balance when present.
    let legacy_balance: Option<f64> = tx
        .query_row(
            "SELECT balance FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    let demo_balance = legacy_balance.unwrap_or(default_demo_balance);
    let created = now_ms();

    tx.execute(
        "INSERT INTO accounts (user_id, account_type, balance, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, DEMO_ACCOUNT, demo_balance, created],
    )?;
    let demo_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO accounts (user_id, account_type, balance, created_at) VALUES (?1, ?2, 0.0, ?3)",
        params![user_id, REAL_ACCOUNT, created],
    )?;
    let real_id = tx.last_insert_rowid();

    Ok(vec![
        Account {
            id: demo_id,
            user_id,
            account_type: DEMO_ACCOUNT.to_string(),
            balance: demo_balance,
        },
        Account {
            id: real_id,
            user_id,
            account_type: REAL_ACCOUNT.to_string(),
            balance: 0.0,
        },
    ])
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
