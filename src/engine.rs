// src/engine.rs
//! Buy and sell execution.
//!
//! A trade resolves its quote first, with no lock held. It then takes the
//! owner's mutation scope, re-reads the account and holding, validates, and
//! hands the store a single [`TradeCommit`]. Requests for one owner queue on
//! that owner's mutex in arrival order; different owners never contend.

use crate::clock::Clock;
use crate::db::Store;
use crate::error::AppError;
use crate::models::{
    normalize_symbol, Account, AccountId, Holding, LedgerEntry, Quote, TradeCommit, TradeReceipt,
};
use crate::quote::QuoteProvider;
use dashmap::DashMap;
use log::{info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct TradingEngine {
    store: Arc<dyn Store>,
    quotes: Arc<dyn QuoteProvider>,
    clock: Arc<dyn Clock>,
    owner_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl TradingEngine {
    pub fn new(store: Arc<dyn Store>, quotes: Arc<dyn QuoteProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            quotes,
            clock,
            owner_locks: DashMap::new(),
        }
    }

    pub async fn buy(
        &self,
        owner: AccountId,
        symbol: &str,
        requested: i64,
    ) -> Result<TradeReceipt, AppError> {
        let shares = positive_shares(requested)?;
        let symbol = normalize_symbol(symbol)?;
        let quote = self.resolve_quote(&symbol).await?;
        let symbol = normalize_symbol(&quote.symbol)?;
        let cost = notional(quote.price, shares)?;

        let _scope = self.lock_owner(owner).await;
        let account = self.load_account(owner).await?;
        if cost > account.cash {
            warn!(
                "Rejected buy for {}: {} x {} costs {}, cash {}",
                owner, shares, symbol, cost, account.cash
            );
            return Err(AppError::InsufficientFunds {
                required: cost,
                available: account.cash,
            });
        }
        let held = self
            .store
            .holding(owner, &symbol)
            .await?
            .map(|h| h.shares)
            .unwrap_or(0);
        let shares_after = held
            .checked_add(shares)
            .ok_or_else(|| AppError::InvalidInput("share count too large".into()))?;

        let receipt = self
            .commit(&account, &symbol, shares, quote.price, account.cash - cost, shares_after)
            .await?;
        info!(
            "Bought {} {} @ {} for {} (cash {})",
            shares, symbol, quote.price, owner, receipt.cash
        );
        Ok(receipt)
    }

    pub async fn sell(
        &self,
        owner: AccountId,
        symbol: &str,
        requested: i64,
    ) -> Result<TradeReceipt, AppError> {
        let shares = positive_shares(requested)?;
        let symbol = normalize_symbol(symbol)?;
        // Reject unknown owners and unowned symbols before paying for a quote round-trip.
        self.load_account(owner).await?;
        self.sellable(owner, &symbol, shares).await?;
        let quote = self.resolve_quote(&symbol).await?;
        let proceeds = notional(quote.price, shares)?;

        let _scope = self.lock_owner(owner).await;
        let account = self.load_account(owner).await?;
        let held = self.sellable(owner, &symbol, shares).await?;
        let cash_after = account
            .cash
            .checked_add(proceeds)
            .ok_or_else(|| AppError::InvalidInput("cash balance overflow".into()))?;

        let receipt = self
            .commit(&account, &symbol, -shares, quote.price, cash_after, held - shares)
            .await?;
        info!(
            "Sold {} {} @ {} for {} (cash {})",
            shares, symbol, quote.price, owner, receipt.cash
        );
        Ok(receipt)
    }

    /// Current holding if it covers `shares`.
    async fn sellable(&self, owner: AccountId, symbol: &str, shares: i64) -> Result<i64, AppError> {
        let held = match self.store.holding(owner, symbol).await? {
            Some(holding) if holding.shares > 0 => holding.shares,
            _ => {
                warn!("Rejected sell for {}: {} not owned", owner, symbol);
                return Err(AppError::SymbolNotOwned(symbol.to_string()));
            }
        };
        if shares > held {
            warn!(
                "Rejected sell for {}: {} x {} requested, {} held",
                owner, shares, symbol, held
            );
            return Err(AppError::InsufficientShares {
                symbol: symbol.to_string(),
                requested: shares,
                held,
            });
        }
        Ok(held)
    }

    async fn commit(
        &self,
        account: &Account,
        symbol: &str,
        delta: i64,
        price: Decimal,
        cash_after: Decimal,
        shares_after: i64,
    ) -> Result<TradeReceipt, AppError> {
        // Ledger time never runs backwards for an owner.
        let now = self.clock.now();
        let executed_at = match account.last_trade_at {
            Some(last) if last > now => last,
            _ => now,
        };
        let entry = LedgerEntry {
            owner: account.id,
            seq: account.ledger_seq + 1,
            symbol: symbol.to_string(),
            shares: delta,
            price,
            executed_at,
        };
        let commit = TradeCommit {
            owner: account.id,
            expected_seq: account.ledger_seq,
            cash_after,
            holding_after: Holding {
                owner: account.id,
                symbol: symbol.to_string(),
                shares: shares_after,
            },
            entry,
        };
        self.store.commit_trade(&commit).await?;
        Ok(TradeReceipt {
            entry: commit.entry,
            cash: cash_after,
            shares_held: shares_after,
        })
    }

    async fn resolve_quote(&self, symbol: &str) -> Result<Quote, AppError> {
        match self.quotes.lookup(symbol).await? {
            Some(quote) if quote.price > Decimal::ZERO => Ok(quote),
            Some(quote) => Err(AppError::quote_unavailable(
                symbol,
                format!("non-positive price {}", quote.price),
            )),
            None => Err(AppError::SymbolNotFound(symbol.to_string())),
        }
    }

    async fn load_account(&self, owner: AccountId) -> Result<Account, AppError> {
        self.store
            .account(owner)
            .await?
            .ok_or(AppError::UnknownAccount)
    }

    async fn lock_owner(&self, owner: AccountId) -> OwnedMutexGuard<()> {
        let lock = self
            .owner_locks
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

fn positive_shares(requested: i64) -> Result<i64, AppError> {
    if requested <= 0 {
        return Err(AppError::InvalidInput(
            "shares must be a positive whole number".into(),
        ));
    }
    Ok(requested)
}

fn notional(price: Decimal, shares: i64) -> Result<Decimal, AppError> {
    price
        .checked_mul(Decimal::from(shares))
        .ok_or_else(|| AppError::InvalidInput("order value too large".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryStore;
    use crate::quote::StaticQuotes;
    use chrono::{Duration, TimeZone, Utc};
    use futures::future::join_all;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryStore>,
        quotes: Arc<StaticQuotes>,
        clock: Arc<FixedClock>,
        engine: TradingEngine,
        owner: AccountId,
    }

    async fn fixture(cash: Decimal) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let quotes = Arc::new(
            StaticQuotes::new()
                .with_quote("X", "X Industries", dec!(50.00))
                .with_quote("ACME", "Acme Corp", dec!(12.3456)),
        );
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
        ));
        let owner = AccountId::new();
        store
            .create_account(&Account {
                id: owner,
                username: "trader".into(),
                credential_hash: "plain$trader123".into(),
                cash,
                ledger_seq: 0,
                last_trade_at: None,
                created_at: clock.now(),
            })
            .await
            .unwrap();
        let engine = TradingEngine::new(store.clone(), quotes.clone(), clock.clone());
        Fixture {
            store,
            quotes,
            clock,
            engine,
            owner,
        }
    }

    async fn snapshot(f: &Fixture) -> (Decimal, Vec<Holding>, Vec<LedgerEntry>) {
        let account = f.store.account(f.owner).await.unwrap().unwrap();
        (
            account.cash,
            f.store.holdings(f.owner).await.unwrap(),
            f.store.ledger(f.owner).await.unwrap(),
        )
    }

    async fn assert_ledger_matches_holdings(f: &Fixture) {
        let ledger = f.store.ledger(f.owner).await.unwrap();
        for symbol in ["X", "ACME"] {
            let sum: i64 = ledger
                .iter()
                .filter(|e| e.symbol == symbol)
                .map(|e| e.shares)
                .sum();
            let held = f
                .store
                .holding(f.owner, symbol)
                .await
                .unwrap()
                .map(|h| h.shares)
                .unwrap_or(0);
            assert_eq!(sum, held, "ledger drift for {}", symbol);
        }
    }

    #[tokio::test]
    async fn buy_debits_cash_and_records_entry() {
        let f = fixture(dec!(10000.00)).await;

        let receipt = f.engine.buy(f.owner, "x", 10).await.unwrap();

        assert_eq!(receipt.cash, dec!(9500.00));
        assert_eq!(receipt.shares_held, 10);
        let (cash, holdings, ledger) = snapshot(&f).await;
        assert_eq!(cash, dec!(9500.00));
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].symbol, "X");
        assert_eq!(holdings[0].shares, 10);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].shares, 10);
        assert_eq!(ledger[0].price, dec!(50.00));
        assert_eq!(ledger[0].seq, 1);
    }

    #[tokio::test]
    async fn repeated_buys_accumulate_one_holding() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 10).await.unwrap();
        f.engine.buy(f.owner, "ACME", 3).await.unwrap();
        let receipt = f.engine.buy(f.owner, "X", 5).await.unwrap();

        assert_eq!(receipt.shares_held, 15);
        let (cash, holdings, _) = snapshot(&f).await;
        assert_eq!(cash, dec!(10000.00) - dec!(750.00) - dec!(37.0368));
        // Buying X must not touch the ACME row.
        let acme = holdings.iter().find(|h| h.symbol == "ACME").unwrap();
        assert_eq!(acme.shares, 3);
        assert_ledger_matches_holdings(&f).await;
    }

    #[tokio::test]
    async fn sell_credits_cash_and_records_negative_entry() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 10).await.unwrap();
        f.quotes.set_price("X", dec!(55.00));

        let receipt = f.engine.sell(f.owner, "X", 4).await.unwrap();

        assert_eq!(receipt.cash, dec!(9500.00) + dec!(220.00));
        assert_eq!(receipt.shares_held, 6);
        assert_eq!(receipt.entry.shares, -4);
        assert_eq!(receipt.entry.price, dec!(55.00));
        assert_ledger_matches_holdings(&f).await;
    }

    #[tokio::test]
    async fn overselling_is_rejected_without_changes() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 10).await.unwrap();
        let before = snapshot(&f).await;

        let err = f.engine.sell(f.owner, "X", 15).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientShares { requested: 15, held: 10, .. }
        ));
        assert_eq!(snapshot(&f).await, before);
    }

    #[tokio::test]
    async fn unaffordable_buy_is_rejected_without_changes() {
        let f = fixture(dec!(100.00)).await;
        let before = snapshot(&f).await;

        let err = f.engine.buy(f.owner, "X", 3).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientFunds { required, available }
                if required == dec!(150.00) && available == dec!(100.00)
        ));
        assert_eq!(snapshot(&f).await, before);
    }

    #[tokio::test]
    async fn buying_exactly_the_balance_leaves_zero_cash() {
        let f = fixture(dec!(100.00)).await;
        let receipt = f.engine.buy(f.owner, "X", 2).await.unwrap();
        assert_eq!(receipt.cash, Decimal::ZERO);
    }

    #[tokio::test]
    async fn liquidated_symbol_is_no_longer_owned() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 10).await.unwrap();

        let receipt = f.engine.sell(f.owner, "X", 10).await.unwrap();
        assert_eq!(receipt.shares_held, 0);
        assert!(f.store.holding(f.owner, "X").await.unwrap().is_none());
        assert!(f.store.holdings(f.owner).await.unwrap().is_empty());

        let err = f.engine.sell(f.owner, "X", 1).await.unwrap_err();
        assert!(matches!(err, AppError::SymbolNotOwned(s) if s == "X"));
        // History keeps both trades.
        assert_eq!(f.store.ledger(f.owner).await.unwrap().len(), 2);
        assert_ledger_matches_holdings(&f).await;
    }

    #[tokio::test]
    async fn unowned_sell_skips_the_quote_lookup() {
        let f = fixture(dec!(10000.00)).await;
        let err = f.engine.sell(f.owner, "ACME", 1).await.unwrap_err();
        assert!(matches!(err, AppError::SymbolNotOwned(_)));
        assert_eq!(f.quotes.lookups(), 0);
    }

    #[tokio::test]
    async fn quote_failures_reject_before_any_write() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 2).await.unwrap();
        let before = snapshot(&f).await;

        let err = f.engine.buy(f.owner, "NOPE", 1).await.unwrap_err();
        assert!(matches!(err, AppError::SymbolNotFound(s) if s == "NOPE"));

        f.quotes.fail("X");
        let err = f.engine.sell(f.owner, "X", 1).await.unwrap_err();
        assert!(matches!(err, AppError::QuoteUnavailable { .. }));
        assert_eq!(snapshot(&f).await, before);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let f = fixture(dec!(10000.00)).await;
        for shares in [0, -5] {
            assert!(matches!(
                f.engine.buy(f.owner, "X", shares).await,
                Err(AppError::InvalidInput(_))
            ));
            assert!(matches!(
                f.engine.sell(f.owner, "X", shares).await,
                Err(AppError::InvalidInput(_))
            ));
        }
        assert!(matches!(
            f.engine.buy(f.owner, "  ", 1).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            f.engine.buy(AccountId::new(), "X", 1).await,
            Err(AppError::UnknownAccount)
        ));
        assert_eq!(f.store.ledger(f.owner).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn selling_for_an_unknown_owner_fails_before_quoting() {
        let f = fixture(dec!(10000.00)).await;
        let lookups = f.quotes.lookups();

        let err = f.engine.sell(AccountId::new(), "X", 1).await.unwrap_err();

        assert!(matches!(err, AppError::UnknownAccount));
        assert_eq!(f.quotes.lookups(), lookups);
    }

    #[tokio::test]
    async fn storage_outage_leaves_state_untouched() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 2).await.unwrap();
        let before = snapshot(&f).await;

        f.store.set_offline(true);
        let err = f.engine.buy(f.owner, "X", 1).await.unwrap_err();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
        f.store.set_offline(false);

        assert_eq!(snapshot(&f).await, before);
    }

    #[tokio::test]
    async fn ledger_time_never_goes_backwards() {
        let f = fixture(dec!(10000.00)).await;
        let first = f.engine.buy(f.owner, "X", 1).await.unwrap();
        f.clock.advance(Duration::minutes(-5));
        let second = f.engine.buy(f.owner, "X", 1).await.unwrap();
        f.clock.advance(Duration::minutes(10));
        let third = f.engine.buy(f.owner, "X", 1).await.unwrap();

        assert_eq!(second.entry.executed_at, first.entry.executed_at);
        assert!(third.entry.executed_at > second.entry.executed_at);
        assert_eq!(
            [first.entry.seq, second.entry.seq, third.entry.seq],
            [1, 2, 3]
        );
    }

    #[tokio::test]
    async fn concurrent_sells_accept_only_the_prefix_that_fits() {
        let f = fixture(dec!(10000.00)).await;
        f.engine.buy(f.owner, "X", 10).await.unwrap();

        let results = join_all(
            [6, 3, 5, 1]
                .into_iter()
                .map(|n| f.engine.sell(f.owner, "X", n)),
        )
        .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(AppError::InsufficientShares { requested: 5, held: 1, .. })
        ));
        assert!(results[3].is_ok());
        assert!(f.store.holding(f.owner, "X").await.unwrap().is_none());
        assert_ledger_matches_holdings(&f).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_sells_never_overdraw() {
        let f = Arc::new(fixture(dec!(10000.00)).await);
        f.engine.buy(f.owner, "X", 10).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                tokio::spawn(async move { f.engine.sell(f.owner, "X", 3).await })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(AppError::InsufficientShares { .. }) | Err(AppError::SymbolNotOwned(_)) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(accepted, 3);
        let (cash, holdings, _) = snapshot(&f).await;
        assert_eq!(holdings[0].shares, 1);
        assert_eq!(cash, dec!(9500.00) + dec!(450.00));
        assert_ledger_matches_holdings(&f).await;
    }
}
