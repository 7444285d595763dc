// src/db.rs
use crate::error::AppError;
use crate::models::{Account, AccountId, Holding, LedgerEntry, TradeCommit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{Session, SessionBuilder};
use std::str::FromStr;

/// Accounts, holdings and the trade ledger behind one seam.
///
/// `commit_trade` is the only write path for cash, holdings and the ledger,
/// and it is all-or-nothing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `UsernameTaken` if the username already exists.
    async fn create_account(&self, account: &Account) -> Result<(), AppError>;

    async fn account(&self, id: AccountId) -> Result<Option<Account>, AppError>;

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, AppError>;

    /// Holdings with a positive share count, ordered by symbol.
    async fn holdings(&self, owner: AccountId) -> Result<Vec<Holding>, AppError>;

    async fn holding(&self, owner: AccountId, symbol: &str) -> Result<Option<Holding>, AppError>;

    /// The owner's ledger in sequence order.
    async fn ledger(&self, owner: AccountId) -> Result<Vec<LedgerEntry>, AppError>;

    async fn commit_trade(&self, commit: &TradeCommit) -> Result<(), AppError>;
}

const ACCOUNT_COLUMNS: &str = "id, username, hash, cash, ledger_seq, last_trade_at, created_at";

pub struct ScyllaStore {
    session: Session,
}

impl ScyllaStore {
    pub async fn connect(node: &str) -> Result<Self, AppError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| AppError::storage("failed to connect to ScyllaDB", e))?;

        let schema = [
            "CREATE KEYSPACE IF NOT EXISTS stock_trader WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}",
            "CREATE TABLE IF NOT EXISTS stock_trader.accounts (id TEXT PRIMARY KEY, username TEXT, hash TEXT, cash TEXT, ledger_seq BIGINT, last_trade_at BIGINT, created_at BIGINT)",
            "CREATE TABLE IF NOT EXISTS stock_trader.usernames (username TEXT PRIMARY KEY, account_id TEXT)",
            "CREATE TABLE IF NOT EXISTS stock_trader.holdings (owner_id TEXT, symbol TEXT, shares BIGINT, PRIMARY KEY (owner_id, symbol))",
            "CREATE TABLE IF NOT EXISTS stock_trader.ledger (owner_id TEXT, seq BIGINT, symbol TEXT, shares BIGINT, price TEXT, executed_at BIGINT, PRIMARY KEY (owner_id, seq)) WITH CLUSTERING ORDER BY (seq ASC)",
        ];
        for statement in schema {
            session
                .query(statement, &[])
                .await
                .map_err(|e| AppError::storage("schema setup failed", e))?;
        }

        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(Self { session })
    }

    async fn fetch_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        let query = format!(
            "SELECT {} FROM stock_trader.accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        );
        let rows = self
            .session
            .query(query, (id,))
            .await
            .map_err(|e| AppError::storage("account query failed", e))?
            .rows
            .unwrap_or_default();
        rows.into_iter().next().map(|row| account_from_row(&row)).transpose()
    }
}

#[async_trait]
impl Store for ScyllaStore {
    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        let id = account.id.to_string();
        let claimed = self
            .session
            .query(
                "INSERT INTO stock_trader.usernames (username, account_id) VALUES (?, ?) IF NOT EXISTS",
                (account.username.as_str(), id.as_str()),
            )
            .await
            .map_err(|e| AppError::storage("username reservation failed", e))?;
        let applied = claimed
            .rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next().flatten())
            .map(|value| matches!(value, CqlValue::Boolean(true)))
            .unwrap_or(false);
        if !applied {
            return Err(AppError::UsernameTaken(account.username.clone()));
        }

        let inserted = self
            .session
            .query(
                "INSERT INTO stock_trader.accounts (id, username, hash, cash, ledger_seq, last_trade_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    id.as_str(),
                    account.username.as_str(),
                    account.credential_hash.as_str(),
                    account.cash.to_string(),
                    account.ledger_seq as i64,
                    account.last_trade_at.map(|t| t.timestamp_millis()),
                    account.created_at.timestamp_millis(),
                ),
            )
            .await;
        if let Err(e) = inserted {
            // Release the name so the user can retry.
            if let Err(release) = self
                .session
                .query(
                    "DELETE FROM stock_trader.usernames WHERE username = ?",
                    (account.username.as_str(),),
                )
                .await
            {
                warn!("Failed to release username {}: {}", account.username, release);
            }
            return Err(AppError::storage("account insert failed", e));
        }
        Ok(())
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, AppError> {
        self.fetch_account(&id.to_string()).await
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT account_id FROM stock_trader.usernames WHERE username = ?",
                (username,),
            )
            .await
            .map_err(|e| AppError::storage("username query failed", e))?
            .rows
            .unwrap_or_default();
        match rows.into_iter().next() {
            Some(row) => {
                let id = text(&row, 0)?;
                self.fetch_account(&id).await
            }
            None => Ok(None),
        }
    }

    async fn holdings(&self, owner: AccountId) -> Result<Vec<Holding>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT symbol, shares FROM stock_trader.holdings WHERE owner_id = ?",
                (owner.to_string(),),
            )
            .await
            .map_err(|e| AppError::storage("holdings query failed", e))?
            .rows
            .unwrap_or_default();
        let mut holdings = Vec::with_capacity(rows.len());
        for row in rows {
            let holding = Holding {
                owner,
                symbol: text(&row, 0)?,
                shares: bigint(&row, 1)?,
            };
            if holding.shares > 0 {
                holdings.push(holding);
            }
        }
        Ok(holdings)
    }

    async fn holding(&self, owner: AccountId, symbol: &str) -> Result<Option<Holding>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT shares FROM stock_trader.holdings WHERE owner_id = ? AND symbol = ?",
                (owner.to_string(), symbol),
            )
            .await
            .map_err(|e| AppError::storage("holding query failed", e))?
            .rows
            .unwrap_or_default();
        match rows.into_iter().next() {
            Some(row) => Ok(Some(Holding {
                owner,
                symbol: symbol.to_string(),
                shares: bigint(&row, 0)?,
            })
            .filter(|h| h.shares > 0)),
            None => Ok(None),
        }
    }

    async fn ledger(&self, owner: AccountId) -> Result<Vec<LedgerEntry>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT seq, symbol, shares, price, executed_at FROM stock_trader.ledger WHERE owner_id = ?",
                (owner.to_string(),),
            )
            .await
            .map_err(|e| AppError::storage("ledger query failed", e))?
            .rows
            .unwrap_or_default();
        rows.iter()
            .map(|row| -> Result<LedgerEntry, AppError> {
                Ok(LedgerEntry {
                    owner,
                    seq: bigint(row, 0)? as u64,
                    symbol: text(row, 1)?,
                    shares: bigint(row, 2)?,
                    price: decimal(row, 3)?,
                    executed_at: millis(bigint(row, 4)?)?,
                })
            })
            .collect()
    }

    /// One logged batch: Scylla applies all three statements or none.
    async fn commit_trade(&self, commit: &TradeCommit) -> Result<(), AppError> {
        let owner = commit.owner.to_string();
        let owner = owner.as_str();
        let entry = &commit.entry;
        let seq = entry.seq as i64;
        let executed_at = entry.executed_at.timestamp_millis();
        let cash = commit.cash_after.to_string();
        let price = entry.price.to_string();
        let symbol = commit.holding_after.symbol.as_str();

        let result = if commit.holding_after.shares == 0 {
            self.session
                .query(
                    "BEGIN BATCH \
                     UPDATE stock_trader.accounts SET cash = ?, ledger_seq = ?, last_trade_at = ? WHERE id = ?; \
                     DELETE FROM stock_trader.holdings WHERE owner_id = ? AND symbol = ?; \
                     INSERT INTO stock_trader.ledger (owner_id, seq, symbol, shares, price, executed_at) VALUES (?, ?, ?, ?, ?, ?); \
                     APPLY BATCH",
                    (
                        cash.as_str(),
                        seq,
                        executed_at,
                        owner,
                        owner,
                        symbol,
                        owner,
                        seq,
                        entry.symbol.as_str(),
                        entry.shares,
                        price.as_str(),
                        executed_at,
                    ),
                )
                .await
        } else {
            self.session
                .query(
                    "BEGIN BATCH \
                     UPDATE stock_trader.accounts SET cash = ?, ledger_seq = ?, last_trade_at = ? WHERE id = ?; \
                     INSERT INTO stock_trader.holdings (owner_id, symbol, shares) VALUES (?, ?, ?); \
                     INSERT INTO stock_trader.ledger (owner_id, seq, symbol, shares, price, executed_at) VALUES (?, ?, ?, ?, ?, ?); \
                     APPLY BATCH",
                    (
                        cash.as_str(),
                        seq,
                        executed_at,
                        owner,
                        owner,
                        symbol,
                        commit.holding_after.shares,
                        owner,
                        seq,
                        entry.symbol.as_str(),
                        entry.shares,
                        price.as_str(),
                        executed_at,
                    ),
                )
                .await
        };
        result.map_err(|e| AppError::storage("trade batch failed", e))?;
        Ok(())
    }
}

fn column(row: &Row, index: usize) -> Result<&CqlValue, AppError> {
    row.columns
        .get(index)
        .and_then(|c| c.as_ref())
        .ok_or_else(|| AppError::storage("row decode", format!("column {} is null", index)))
}

fn text(row: &Row, index: usize) -> Result<String, AppError> {
    column(row, index)?
        .as_text()
        .cloned()
        .ok_or_else(|| AppError::storage("row decode", format!("column {} is not text", index)))
}

fn bigint(row: &Row, index: usize) -> Result<i64, AppError> {
    column(row, index)?
        .as_bigint()
        .ok_or_else(|| AppError::storage("row decode", format!("column {} is not bigint", index)))
}

fn decimal(row: &Row, index: usize) -> Result<Decimal, AppError> {
    let raw = text(row, index)?;
    Decimal::from_str(&raw).map_err(|e| AppError::storage("row decode", e))
}

fn millis(ms: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::storage("row decode", format!("timestamp {} out of range", ms)))
}

fn account_from_row(row: &Row) -> Result<Account, AppError> {
    let last_trade_at = match row.columns.get(5).and_then(|c| c.as_ref()) {
        Some(value) => match value.as_bigint() {
            Some(ms) => Some(millis(ms)?),
            None => None,
        },
        None => None,
    };
    Ok(Account {
        id: AccountId::from_str(&text(row, 0)?).map_err(|e| AppError::storage("row decode", e))?,
        username: text(row, 1)?,
        credential_hash: text(row, 2)?,
        cash: decimal(row, 3)?,
        ledger_seq: bigint(row, 4)? as u64,
        last_trade_at,
        created_at: millis(bigint(row, 6)?)?,
    })
}
