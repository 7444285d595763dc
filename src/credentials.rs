// src/credentials.rs
use crate::error::AppError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

/// Opaque password hashing. Stored hashes are never interpreted outside an
/// implementation of this trait.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AppError>;
    fn verify(&self, hash: &str, password: &str) -> bool;
}

/// Argon2id with a fresh OS-random salt, PHC string output.
#[derive(Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::internal("credential hashing failed", e))
    }

    fn verify(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Cheap reversible "hash" so tests don't pay Argon2's cost per account.
#[cfg(test)]
pub(crate) struct PlainHasher;

#[cfg(test)]
impl CredentialHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        Ok(format!("plain${}", password))
    }

    fn verify(&self, hash: &str, password: &str) -> bool {
        hash.strip_prefix("plain$") == Some(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_hash_verifies_only_the_hashed_password() {
        let hasher = Argon2Hasher::default();
        let hash = hasher.hash("hunter22a").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify(&hash, "hunter22a"));
        assert!(!hasher.verify(&hash, "hunter22b"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = Argon2Hasher::default();
        assert_ne!(hasher.hash("same1pass").unwrap(), hasher.hash("same1pass").unwrap());
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!Argon2Hasher::default().verify("not-a-phc-string", "whatever1"));
    }
}
