// src/state.rs
use crate::accounts::AccountService;
use crate::auth::TokenIssuer;
use crate::clock::Clock;
use crate::credentials::CredentialHasher;
use crate::db::Store;
use crate::engine::TradingEngine;
use crate::portfolio::PortfolioView;
use crate::quote::QuoteProvider;
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Services shared by every request handler.
pub struct AppState {
    pub accounts: AccountService,
    pub engine: TradingEngine,
    pub portfolio: PortfolioView,
    pub tokens: TokenIssuer,
}

pub struct Capabilities {
    pub store: Arc<dyn Store>,
    pub quotes: Arc<dyn QuoteProvider>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(caps: Capabilities, starting_cash: Decimal, jwt_secret: &[u8], token_ttl: Duration) -> Self {
        Self {
            accounts: AccountService::new(
                caps.store.clone(),
                caps.hasher,
                caps.clock.clone(),
                starting_cash,
            ),
            engine: TradingEngine::new(caps.store.clone(), caps.quotes.clone(), caps.clock),
            portfolio: PortfolioView::new(caps.store, caps.quotes),
            tokens: TokenIssuer::new(jwt_secret, token_ttl),
        }
    }
}
