// src/quote.rs
use crate::error::AppError;
use crate::models::Quote;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

/// Point-in-time price lookup.
///
/// `Ok(None)` means the symbol does not exist. `Err(QuoteUnavailable)` means
/// the upstream could not answer right now; callers may retry.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, AppError>;
}

#[derive(Deserialize, Default)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

pub struct AlphaVantage {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantage {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: ALPHA_VANTAGE_URL.to_string(),
        }
    }

    async fn fetch(&self, symbol: &str, params: &[(&str, &str)]) -> Result<String, AppError> {
        let mut all_params = params.to_vec();
        all_params.push(("apikey", self.api_key.as_str()));
        let url = reqwest::Url::parse_with_params(&self.base_url, &all_params)
            .map_err(|e| AppError::quote_unavailable(symbol, e.to_string()))?;
        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(self.api_key.as_str(), "***")
        );

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::quote_unavailable(symbol, e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::quote_unavailable(
                symbol,
                format!("HTTP {}", response.status()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| AppError::quote_unavailable(symbol, e.to_string()))
    }

    async fn company_name(&self, symbol: &str) -> Option<String> {
        let body = match self
            .fetch(symbol, &[("function", "SYMBOL_SEARCH"), ("keywords", symbol)])
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Name lookup for {} failed: {}", symbol, e);
                return None;
            }
        };
        parse_company_name(symbol, &body)
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantage {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, AppError> {
        let body = self
            .fetch(symbol, &[("function", "GLOBAL_QUOTE"), ("symbol", symbol)])
            .await?;
        let (symbol, price) = match parse_global_quote(symbol, &body)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let name = self
            .company_name(&symbol)
            .await
            .unwrap_or_else(|| symbol.clone());
        Ok(Some(Quote {
            symbol,
            name,
            price,
        }))
    }
}

fn parse_global_quote(symbol: &str, body: &str) -> Result<Option<(String, Decimal)>, AppError> {
    let response: GlobalQuoteResponse = serde_json::from_str(body)
        .map_err(|e| AppError::quote_unavailable(symbol, format!("bad payload: {}", e)))?;

    if response.error_message.is_some() {
        return Ok(None);
    }
    if let Some(msg) = response.note.or(response.information) {
        return Err(AppError::quote_unavailable(symbol, msg));
    }

    let quote = response.quote.unwrap_or_default();
    let (found, price) = match (quote.symbol, quote.price) {
        (Some(found), Some(price)) => (found, price),
        _ => return Ok(None),
    };
    match Decimal::from_str(price.trim()) {
        Ok(price) if price > Decimal::ZERO => Ok(Some((found.to_ascii_uppercase(), price))),
        _ => Err(AppError::quote_unavailable(
            symbol,
            format!("unusable price {:?}", price),
        )),
    }
}

fn parse_company_name(symbol: &str, body: &str) -> Option<String> {
    let response: SymbolSearchResponse = serde_json::from_str(body).ok()?;
    response
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
        .map(|m| m.name)
}

/// In-process quote table. Used by tests and offline runs.
#[derive(Default)]
pub struct StaticQuotes {
    quotes: RwLock<HashMap<String, Quote>>,
    failing: RwLock<HashSet<String>>,
    lookups: AtomicUsize,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(self, symbol: &str, name: &str, price: Decimal) -> Self {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                symbol.to_string(),
                Quote {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    price,
                },
            );
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(symbol.to_string())
            .and_modify(|q| q.price = price)
            .or_insert_with(|| Quote {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                price,
            });
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(symbol);
    }

    /// Make lookups of `symbol` fail as if the upstream were down.
    pub fn fail(&self, symbol: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for StaticQuotes {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(symbol)
        {
            return Err(AppError::quote_unavailable(symbol, "upstream down"));
        }
        Ok(self
            .quotes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn global_quote_with_price_is_found() {
        let body = r#"{
            "Global Quote": {
                "01. symbol": "IBM",
                "02. open": "183.2000",
                "05. price": "185.6400",
                "07. latest trading day": "2024-03-01"
            }
        }"#;
        let (symbol, price) = parse_global_quote("IBM", body).unwrap().unwrap();
        assert_eq!(symbol, "IBM");
        assert_eq!(price, dec!(185.6400));
    }

    #[test]
    fn empty_global_quote_means_not_found() {
        assert!(parse_global_quote("ZZZZ", r#"{"Global Quote": {}}"#)
            .unwrap()
            .is_none());
        let body = r#"{"Error Message": "Invalid API call. Please retry or visit the documentation"}"#;
        assert!(parse_global_quote("ZZZZ", body).unwrap().is_none());
    }

    #[test]
    fn rate_limit_note_is_unavailable() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute"}"#;
        let err = parse_global_quote("IBM", body).unwrap_err();
        assert!(matches!(err, AppError::QuoteUnavailable { .. }));
    }

    #[test]
    fn non_positive_or_garbled_price_is_unavailable() {
        for price in ["0.0000", "-1", "n/a"] {
            let body = format!(
                r#"{{"Global Quote": {{"01. symbol": "IBM", "05. price": "{}"}}}}"#,
                price
            );
            assert!(matches!(
                parse_global_quote("IBM", &body),
                Err(AppError::QuoteUnavailable { .. })
            ));
        }
    }

    #[test]
    fn company_name_comes_from_exact_match() {
        let body = r#"{"bestMatches": [
            {"1. symbol": "IBMN", "2. name": "iShares iBonds"},
            {"1. symbol": "IBM", "2. name": "International Business Machines Corp"}
        ]}"#;
        assert_eq!(
            parse_company_name("IBM", body).as_deref(),
            Some("International Business Machines Corp")
        );
        assert_eq!(parse_company_name("XYZ", body), None);
    }

    #[tokio::test]
    async fn static_quotes_track_lookups_and_failures() {
        let quotes = StaticQuotes::new().with_quote("ACME", "Acme Corp", dec!(12.50));
        assert_eq!(
            quotes.lookup("ACME").await.unwrap().unwrap().price,
            dec!(12.50)
        );
        assert!(quotes.lookup("NOPE").await.unwrap().is_none());
        quotes.fail("ACME");
        assert!(quotes.lookup("ACME").await.is_err());
        assert_eq!(quotes.lookups(), 3);
    }
}
