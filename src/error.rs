// src/error.rs
use log::error;
use rust_decimal::Decimal;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Every way a request can fail. Business and input errors are raised before
/// anything is written; infrastructure errors abort with no partial writes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown symbol {0}")]
    SymbolNotFound(String),

    #[error("quote for {symbol} unavailable: {reason}")]
    QuoteUnavailable { symbol: String, reason: String },

    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: i64,
        held: i64,
    },

    #[error("symbol {0} not owned")]
    SymbolNotOwned(String),

    #[error("username {0} is already taken")]
    UsernameTaken(String),

    #[error("weak password: {0}")]
    WeakPassword(&'static str),

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("invalid username and/or password")]
    InvalidCredentials,

    #[error("unknown account")]
    UnknownAccount,

    #[error("authentication required")]
    Unauthorized,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("transaction conflict")]
    TransactionConflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a driver/backend failure. The detail is logged here and never
    /// leaves the process.
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        AppError::StorageUnavailable(format!("{}: {}", context, err))
    }

    /// Wraps an in-process failure that is not the caller's fault and not
    /// a backend outage (hashing, token signing, arithmetic limits).
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        AppError::Internal(format!("{}: {}", context, err))
    }

    pub fn quote_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        AppError::QuoteUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::SymbolNotFound(_)
            | AppError::InsufficientFunds { .. }
            | AppError::InsufficientShares { .. }
            | AppError::SymbolNotOwned(_)
            | AppError::WeakPassword(_) => StatusCode::BAD_REQUEST,
            AppError::UsernameTaken(_)
            | AppError::PasswordMismatch
            | AppError::InvalidCredentials
            | AppError::UnknownAccount
            | AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::QuoteUnavailable { .. }
            | AppError::StorageUnavailable(_)
            | AppError::TransactionConflict
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND",
            AppError::QuoteUnavailable { .. } => "QUOTE_UNAVAILABLE",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            AppError::SymbolNotOwned(_) => "SYMBOL_NOT_OWNED",
            AppError::UsernameTaken(_) => "USERNAME_TAKEN",
            AppError::WeakPassword(_) => "WEAK_PASSWORD",
            AppError::PasswordMismatch => "PASSWORD_MISMATCH",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::UnknownAccount => "UNKNOWN_ACCOUNT",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::TransactionConflict => "TRANSACTION_CONFLICT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AppError::QuoteUnavailable { symbol, .. } => {
                format!("quote for {} is temporarily unavailable, try again", symbol)
            }
            AppError::StorageUnavailable(_) | AppError::TransactionConflict => {
                "internal error, nothing was changed; try again".to_string()
            }
            AppError::Internal(_) => "internal error, nothing was changed".to_string(),
            other => other.to_string(),
        }
    }

    /// Nothing was committed and the same request may succeed later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AppError::QuoteUnavailable { .. }
                | AppError::StorageUnavailable(_)
                | AppError::TransactionConflict
        )
    }
}

impl Reject for AppError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn business_rejections_are_caller_errors() {
        let err = AppError::InsufficientFunds {
            required: dec!(150.00),
            available: dec!(100.00),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert!(err.public_message().contains("150.00"));
        assert!(!err.retryable());
    }

    #[test]
    fn account_errors_are_forbidden() {
        for err in [
            AppError::UsernameTaken("bob".into()),
            AppError::PasswordMismatch,
            AppError::InvalidCredentials,
            AppError::Unauthorized,
        ] {
            assert_eq!(err.status(), StatusCode::FORBIDDEN, "{:?}", err);
        }
    }

    #[test]
    fn infrastructure_detail_is_not_exposed() {
        let err = AppError::StorageUnavailable("node 10.0.0.7:9042 timed out".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("10.0.0.7"));
        assert!(err.retryable());

        let err = AppError::quote_unavailable("AAPL", "HTTP 502");
        assert!(!err.public_message().contains("502"));
        assert!(err.retryable());
    }

    #[test]
    fn internal_failures_are_not_reported_as_storage() {
        let err = AppError::internal("token signing failed", "InvalidKeyFormat");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.public_message().contains("InvalidKeyFormat"));
        assert!(!err.retryable());
    }
}
