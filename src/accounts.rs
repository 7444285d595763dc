// src/accounts.rs
use crate::clock::Clock;
use crate::credentials::CredentialHasher;
use crate::db::Store;
use crate::error::AppError;
use crate::models::{Account, AccountId};
use log::{info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Registration and login. Holds no session state; callers get an
/// [`AccountId`] back and carry it themselves.
pub struct AccountService {
    store: Arc<dyn Store>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    starting_cash: Decimal,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        starting_cash: Decimal,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
            starting_cash,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<AccountId, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::InvalidInput("must provide username".into()));
        }
        if self.store.account_by_username(username).await?.is_some() {
            return Err(AppError::UsernameTaken(username.to_string()));
        }
        if password != confirmation {
            return Err(AppError::PasswordMismatch);
        }
        check_password_policy(password)?;

        let account = Account {
            id: AccountId::new(),
            username: username.to_string(),
            credential_hash: self.hasher.hash(password)?,
            cash: self.starting_cash,
            ledger_seq: 0,
            last_trade_at: None,
            created_at: self.clock.now(),
        };
        self.store.create_account(&account).await?;
        info!("Registered {} as {}", username, account.id);
        Ok(account.id)
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AccountId, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::InvalidInput("must provide username".into()));
        }
        if password.is_empty() {
            return Err(AppError::InvalidInput("must provide password".into()));
        }
        match self.store.account_by_username(username).await? {
            Some(account) if self.hasher.verify(&account.credential_hash, password) => {
                Ok(account.id)
            }
            _ => {
                warn!("Failed login for {}", username);
                Err(AppError::InvalidCredentials)
            }
        }
    }
}

pub fn check_password_policy(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::WeakPassword("must be at least 8 characters"));
    }
    let has_alpha = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(char::is_numeric);
    if !(has_alpha && has_digit) {
        return Err(AppError::WeakPassword(
            "must combine letters and numbers",
        ));
    }
    Ok(())
}
