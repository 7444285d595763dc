// src/auth.rs
use crate::error::AppError;
use crate::models::AccountId;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    jti: String,
}

/// Issues and checks bearer tokens. Log-out revokes a token's id until the
/// token would have expired anyway.
pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl: Duration,
    revoked: DashMap<String, usize>,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
            revoked: DashMap::new(),
        }
    }

    pub fn create_token(&self, account: AccountId) -> Result<String, AppError> {
        let exp = (Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims {
            sub: account.to_string(),
            exp,
            jti: Uuid::new_v4().to_string(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| AppError::internal("token signing failed", e))
    }

    pub fn validate(&self, token: &str) -> Result<AccountId, AppError> {
        let claims = self.decode(token)?;
        if self.revoked.contains_key(&claims.jti) {
            return Err(AppError::Unauthorized);
        }
        claims.sub.parse().map_err(|_| AppError::Unauthorized)
    }

    pub fn revoke(&self, token: &str) -> Result<(), AppError> {
        let claims = self.decode(token)?;
        let now = Utc::now().timestamp().max(0) as usize;
        self.revoked.retain(|_, exp| *exp >= now);
        self.revoked.insert(claims.jti, claims.exp);
        Ok(())
    }

    fn decode(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            AppError::Unauthorized
        })
    }
}
