// src/models.rs
use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        AccountId(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(AccountId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub credential_hash: String,
    pub cash: Decimal,
    /// Sequence number of the owner's last ledger entry, 0 before any trade.
    pub ledger_seq: u64,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub owner: AccountId,
    pub symbol: String,
    pub shares: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub owner: AccountId,
    pub seq: u64,
    pub symbol: String,
    /// Positive for a buy, negative for a sell.
    pub shares: i64,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

/// Everything one trade writes. Stores apply it entirely or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeCommit {
    pub owner: AccountId,
    /// `ledger_seq` the engine read; the commit is refused if it moved.
    pub expected_seq: u64,
    pub cash_after: Decimal,
    /// A holding with zero shares means the row is removed.
    pub holding_after: Holding,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub entry: LedgerEntry,
    pub cash: Decimal,
    pub shares_held: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioLine {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub market_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub cash: Decimal,
    pub holdings: Vec<PortfolioLine>,
    pub holdings_value: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Raw trade form. `shares` stays loosely typed until [`parse_shares`] so
/// that fractional and textual values get a proper `InvalidInput`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TradeRequest {
    pub symbol: Option<String>,
    pub shares: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub account_id: AccountId,
    pub token: String,
}

pub fn normalize_symbol(symbol: &str) -> Result<String, AppError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(AppError::InvalidInput("missing symbol".into()));
    }
    Ok(symbol.to_ascii_uppercase())
}

pub fn parse_shares(raw: Option<&Value>) -> Result<i64, AppError> {
    let shares = match raw {
        None | Some(Value::Null) => return Err(AppError::InvalidInput("missing shares".into())),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match shares {
        Some(n) if n > 0 => Ok(n),
        _ => Err(AppError::InvalidInput(
            "shares must be a positive whole number".into(),
        )),
    }
}
