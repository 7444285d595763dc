// src/config.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3030";
pub const DEFAULT_STARTING_CASH: Decimal = dec!(10000.00);
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub jwt_secret: String,
    pub scylla_node: Option<String>,
    pub starting_cash: Decimal,
    pub token_ttl_secs: i64,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }

        let bind_addr: SocketAddr = parse("BIND_ADDR", get("BIND_ADDR"), DEFAULT_BIND_ADDR.parse().ok())?;
        let starting_cash = parse("STARTING_CASH", get("STARTING_CASH"), Some(DEFAULT_STARTING_CASH))?;
        if starting_cash.is_sign_negative() {
            return Err(ConfigError::Invalid {
                name: "STARTING_CASH",
                reason: "must not be negative".into(),
            });
        }
        let token_ttl_secs = parse(
            "TOKEN_TTL_SECS",
            get("TOKEN_TTL_SECS"),
            Some(DEFAULT_TOKEN_TTL_SECS),
        )?;
        if token_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "TOKEN_TTL_SECS",
                reason: "must be positive".into(),
            });
        }

        Ok(Config {
            bind_addr,
            api_key,
            jwt_secret,
            scylla_node: get("SCYLLA_NODE"),
            starting_cash,
            token_ttl_secs,
        })
    }
}

fn parse<T>(name: &'static str, raw: Option<String>, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [("API_KEY", "demo"), ("JWT_SECRET", "0123456789abcdef")];

    #[test]
    fn defaults_fill_optional_values() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.starting_cash, dec!(10000.00));
        assert_eq!(config.token_ttl_secs, 3600);
        assert!(config.scylla_node.is_none());
    }

    #[test]
    fn api_key_is_required() {
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("API_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("STARTING_CASH", "2500.50"),
            ("SCYLLA_NODE", "10.0.0.5:9042"),
            ("TOKEN_TTL_SECS", "60"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.starting_cash, dec!(2500.50));
        assert_eq!(config.scylla_node.as_deref(), Some("10.0.0.5:9042"));
        assert_eq!(config.token_ttl_secs, 60);
    }

    #[test]
    fn bad_values_are_reported_by_name() {
        for (name, value) in [
            ("STARTING_CASH", "-1"),
            ("STARTING_CASH", "lots"),
            ("TOKEN_TTL_SECS", "0"),
            ("BIND_ADDR", "nowhere"),
            ("JWT_SECRET", "short"),
        ] {
            let mut vars: Vec<(&str, &str)> =
                REQUIRED.iter().copied().filter(|(k, _)| *k != name).collect();
            vars.push((name, value));
            match Config::from_lookup(lookup(&vars)) {
                Err(ConfigError::Invalid { name: reported, .. }) => assert_eq!(reported, name),
                other => panic!("{}={} gave {:?}", name, value, other),
            }
        }
    }
}
