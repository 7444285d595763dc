// src/portfolio.rs
use crate::db::Store;
use crate::error::AppError;
use crate::models::{normalize_symbol, AccountId, LedgerEntry, Portfolio, PortfolioLine, Quote};
use crate::quote::QuoteProvider;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Read side: priced holdings, quotes and trade history.
pub struct PortfolioView {
    store: Arc<dyn Store>,
    quotes: Arc<dyn QuoteProvider>,
}

impl PortfolioView {
    pub fn new(store: Arc<dyn Store>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { store, quotes }
    }

    /// One line per owned symbol, each priced when the stream reaches it.
    pub async fn lines(
        &self,
        owner: AccountId,
    ) -> Result<impl Stream<Item = Result<PortfolioLine, AppError>> + '_, AppError> {
        let holdings = self.store.holdings(owner).await?;
        Ok(stream::iter(holdings).then(move |holding| async move {
            let quote = self.quote(&holding.symbol).await?;
            let market_value = quote
                .price
                .checked_mul(Decimal::from(holding.shares))
                .ok_or_else(|| value_overflow(&holding.symbol))?;
            Ok::<_, AppError>(PortfolioLine {
                market_value,
                symbol: holding.symbol,
                name: quote.name,
                shares: holding.shares,
                price: quote.price,
            })
        }))
    }

    pub async fn snapshot(&self, owner: AccountId) -> Result<Portfolio, AppError> {
        let account = self
            .store
            .account(owner)
            .await?
            .ok_or(AppError::UnknownAccount)?;
        let holdings: Vec<PortfolioLine> = self.lines(owner).await?.try_collect().await?;
        let holdings_value = holdings
            .iter()
            .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.market_value))
            .ok_or_else(|| value_overflow("holdings"))?;
        let total = account
            .cash
            .checked_add(holdings_value)
            .ok_or_else(|| value_overflow("total"))?;
        Ok(Portfolio {
            cash: account.cash,
            total,
            holdings,
            holdings_value,
        })
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote, AppError> {
        let symbol = normalize_symbol(symbol)?;
        self.quotes
            .lookup(&symbol)
            .await?
            .ok_or(AppError::SymbolNotFound(symbol))
    }

    pub async fn history(&self, owner: AccountId) -> Result<Vec<LedgerEntry>, AppError> {
        if self.store.account(owner).await?.is_none() {
            return Err(AppError::UnknownAccount);
        }
        let mut entries = self.store.ledger(owner).await?;
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries)
    }
}

fn value_overflow(what: &str) -> AppError {
    AppError::internal("portfolio valuation", format!("{} value exceeds the decimal range", what))
}
