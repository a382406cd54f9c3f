use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::login::{Credentials, LoginProvider};

/// A fixed username → password-hash table, handed in at startup (CLI flags
/// or a small static list — no config file format, no hot reload).
pub struct StaticLoginProvider {
    users: HashMap<String, String>,
}

impl StaticLoginProvider {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Convenience constructor for a single account, hashing the plaintext
    /// password immediately.
    pub fn single(username: impl Into<String>, password: &str) -> Result<Self> {
        let mut users = HashMap::new();
        users.insert(username.into(), hash_password(password)?);
        Ok(Self { users })
    }
}

#[async_trait]
impl LoginProvider for StaticLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Credentials> {
        tracing::debug!(user = %username, "login");
        let hash = self
            .users
            .get(username)
            .ok_or_else(|| anyhow!("User {} does not exist", username))?;

        if !verify_password(password, hash)? {
            bail!("Wrong password");
        }

        Ok(Credentials {
            username: username.to_string(),
        })
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Argon2 error: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Invalid hashed password: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_correct_password() {
        let provider = StaticLoginProvider::single("alice", "hunter2").unwrap();
        let creds = provider.login("alice", "hunter2").await.unwrap();
        assert_eq!(creds.username, "alice");
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let provider = StaticLoginProvider::single("alice", "hunter2").unwrap();
        assert!(provider.login("alice", "wrong").await.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let provider = StaticLoginProvider::single("alice", "hunter2").unwrap();
        assert!(provider.login("bob", "hunter2").await.is_err());
    }
}
