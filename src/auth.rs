//! Credential store: registration and password verification.
//!
//! Passwords are never stored in recoverable form. Each user gets a random
//! salt, and the stored digest is an iterated SHA-256 over salt and
//! password. `authenticate` recomputes the digest and compares; unknown
//! users and wrong passwords are indistinguishable to the caller. There is
//! no rate limiting and no lockout.

use anyhow::{bail, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::ChatError;

/// Digest iteration count. Not a tunable — changing it invalidates every
/// stored hash.
const DIGEST_ROUNDS: u32 = 100_000;

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. Fails with [`ChatError::UsernameTaken`] if the
    /// username exists; the existing record is left unchanged.
    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        if username.trim().is_empty() {
            bail!("username must not be empty");
        }
        if password.is_empty() {
            bail!("password must not be empty");
        }

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            return Err(ChatError::UsernameTaken(username.to_string()).into());
        }

        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(password, &salt);

        sqlx::query(
            "INSERT INTO users (username, salt, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(&salt)
        .bind(&password_hash)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Verify a username/password pair. Returns `false` for unknown users.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let row = sqlx::query("SELECT salt, password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let salt: String = row.get("salt");
        let stored: String = row.get("password_hash");
        Ok(hash_password(password, &salt) == stored)
    }
}

/// Salted, iterated SHA-256 digest, hex-encoded.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 1..DIGEST_ROUNDS {
        digest = Sha256::digest(digest.as_slice());
    }
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, CredentialStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (tmp, CredentialStore::new(pool))
    }

    #[test]
    fn test_hash_deterministic_per_salt() {
        let a = hash_password("pw1", "salt-a");
        let b = hash_password("pw1", "salt-a");
        assert_eq!(a, b);
        assert_ne!(a, hash_password("pw1", "salt-b"));
        assert_ne!(a, hash_password("pw2", "salt-a"));
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let (_tmp, store) = test_store().await;
        store.register("alice", "secret").await.unwrap();

        assert!(store.authenticate("alice", "secret").await.unwrap());
        assert!(!store.authenticate("alice", "wrong").await.unwrap());
        assert!(!store.authenticate("nobody", "secret").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (_tmp, store) = test_store().await;
        store.register("alice", "secret").await.unwrap();

        let err = store.register("alice", "other").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::UsernameTaken(_))
        ));

        // The original credentials still hold
        assert!(store.authenticate("alice", "secret").await.unwrap());
        assert!(!store.authenticate("alice", "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let (_tmp, store) = test_store().await;
        assert!(store.register("  ", "secret").await.is_err());
    }
}
