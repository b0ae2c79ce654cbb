use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::AppError;
use crate::models::AdminCredential;

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("password hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Runs on the blocking pool; bcrypt is CPU-bound.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    Ok(tokio::task::spawn_blocking(move || bcrypt::hash(password, HASH_COST)).await??)
}

async fn password_matches(password: &str, hash: &str) -> Result<bool, AuthError> {
    let (password, hash) = (password.to_string(), hash.to_string());
    Ok(tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??)
}

/// Inserts or replaces the single admin credential.
pub async fn seed_admin(pool: &SqlitePool, username: &str, password: &str) -> Result<(), AuthError> {
    let password_hash = hash_password(password).await?;
    sqlx::query(
        r#"
        INSERT INTO admin (username, password_hash) VALUES (?, ?)
        ON CONFLICT (username) DO UPDATE SET password_hash = excluded.password_hash
        "#,
    )
    .bind(username)
    .bind(password_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn verify_credentials(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<bool, AuthError> {
    let credential = sqlx::query_as::<_, AdminCredential>(
        "SELECT username, password_hash FROM admin WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match credential {
        Some(credential) => password_matches(password, &credential.password_hash).await,
        None => Ok(false),
    }
}

/// Issued admin bearer tokens and their expiry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    pub async fn issue(&self) -> String {
        let token = random_token(32);
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(token.clone(), now + self.ttl);
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .is_some_and(|expires_at| *expires_at > self.clock.now())
    }
}

/// Extractor guarding admin-only routes.
pub struct AdminSession;

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    SessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))?;

        let sessions = SessionStore::from_ref(state);
        if sessions.is_valid(token).await {
            Ok(AdminSession)
        } else {
            Err(AppError::Unauthorized("Invalid or expired token".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn seeded_admin_can_log_in() {
        let pool = memory_pool().await;
        seed_admin(&pool, "admin", "slaptas").await.unwrap();

        assert!(verify_credentials(&pool, "admin", "slaptas").await.unwrap());
        assert!(!verify_credentials(&pool, "admin", "neteisingas").await.unwrap());
        assert!(!verify_credentials(&pool, "nobody", "slaptas").await.unwrap());
    }

    #[tokio::test]
    async fn reseeding_replaces_the_password() {
        let pool = memory_pool().await;
        seed_admin(&pool, "admin", "senas").await.unwrap();
        seed_admin(&pool, "admin", "naujas").await.unwrap();

        assert!(!verify_credentials(&pool, "admin", "senas").await.unwrap());
        assert!(verify_credentials(&pool, "admin", "naujas").await.unwrap());
    }

    #[tokio::test]
    async fn stored_hash_is_salted_bcrypt() {
        let pool = memory_pool().await;
        seed_admin(&pool, "admin", "slaptas").await.unwrap();
        let (stored,): (String,) = sqlx::query_as("SELECT password_hash FROM admin")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert!(stored.starts_with("$2"), "{stored}");
        assert!(!stored.contains("slaptas"));
        assert_ne!(stored, hash_password("slaptas").await.unwrap());
        assert!(password_matches("slaptas", &stored).await.unwrap());
    }

    #[tokio::test]
    async fn sessions_expire() {
        let clock = MockClock::at("2025-06-01T09:00:00Z");
        let store = SessionStore::new(clock.clone(), Duration::hours(1));
        let token = store.issue().await;

        assert!(store.is_valid(&token).await);
        assert!(!store.is_valid("forged").await);

        clock.advance_minutes(61);
        assert!(!store.is_valid(&token).await);
    }
}
