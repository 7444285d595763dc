// src/memory.rs
use crate::db::Store;
use crate::error::AppError;
use crate::models::{Account, AccountId, Holding, LedgerEntry, TradeCommit};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    usernames: HashMap<String, AccountId>,
    holdings: BTreeMap<(AccountId, String), i64>,
    ledger: HashMap<AccountId, Vec<LedgerEntry>>,
}

/// Process-local store. Every write happens under one lock, so a commit is
/// visible entirely or not at all.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StorageUnavailable` until
    /// switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::StorageUnavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        if tables.usernames.contains_key(&account.username) {
            return Err(AppError::UsernameTaken(account.username.clone()));
        }
        tables
            .usernames
            .insert(account.username.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, AppError> {
        self.ensure_online()?;
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, AppError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .usernames
            .get(username)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn holdings(&self, owner: AccountId) -> Result<Vec<Holding>, AppError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .holdings
            .range((owner, String::new())..)
            .take_while(|((id, _), _)| *id == owner)
            .filter(|(_, shares)| **shares > 0)
            .map(|((_, symbol), shares)| Holding {
                owner,
                symbol: symbol.clone(),
                shares: *shares,
            })
            .collect())
    }

    async fn holding(&self, owner: AccountId, symbol: &str) -> Result<Option<Holding>, AppError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .holdings
            .get(&(owner, symbol.to_string()))
            .filter(|shares| **shares > 0)
            .map(|shares| Holding {
                owner,
                symbol: symbol.to_string(),
                shares: *shares,
            }))
    }

    async fn ledger(&self, owner: AccountId) -> Result<Vec<LedgerEntry>, AppError> {
        self.ensure_online()?;
        Ok(self
            .tables
            .read()
            .await
            .ledger
            .get(&owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_trade(&self, commit: &TradeCommit) -> Result<(), AppError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;

        let account = tables
            .accounts
            .get_mut(&commit.owner)
            .ok_or(AppError::UnknownAccount)?;
        if account.ledger_seq != commit.expected_seq || commit.entry.seq != commit.expected_seq + 1 {
            return Err(AppError::TransactionConflict);
        }
        account.cash = commit.cash_after;
        account.ledger_seq = commit.entry.seq;
        account.last_trade_at = Some(commit.entry.executed_at);

        let key = (commit.owner, commit.holding_after.symbol.clone());
        if commit.holding_after.shares == 0 {
            tables.holdings.remove(&key);
        } else {
            tables.holdings.insert(key, commit.holding_after.shares);
        }

        tables
            .ledger
            .entry(commit.owner)
            .or_default()
            .push(commit.entry.clone());
        Ok(())
    }
}
