//! Account registration, login, and the in-memory session store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use serde::Deserialize;

use super::db::DbHandle;
use super::models::PublicUser;
use crate::errors::ConsoleError;

pub const SESSION_COOKIE: &str = "console_session";

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Hash a password using argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, ConsoleError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConsoleError::PasswordHash(e.to_string()))
}

/// Verify a password against a stored hash. An unparsable hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is unparsable");
            false
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Create an account. Fails with `EmailTaken` when the email already exists.
pub async fn register(db: &DbHandle, req: RegisterRequest) -> Result<PublicUser, ConsoleError> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ConsoleError::InvalidRequest(
            "name, email and password are required".to_string(),
        ));
    }

    let existing = {
        let email = email.clone();
        db.call(move |db| db.find_user_by_email(&email))
            .await
            .map_err(ConsoleError::Database)?
    };
    if existing.is_some() {
        return Err(ConsoleError::EmailTaken { email });
    }

    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ConsoleError::Other(anyhow::anyhow!("Hash task panicked: {}", e)))??;

    let created = {
        let email = email.clone();
        db.call(move |db| db.create_user(&name, &email, &hash))
            .await
            .map_err(ConsoleError::Database)?
    };
    // The UNIQUE constraint catches a registration racing this one.
    let user = created.ok_or(ConsoleError::EmailTaken { email })?;
    tracing::info!(user_id = user.id, "Registered user");
    Ok(user.public())
}

/// Check credentials. Unknown email and wrong password are indistinguishable.
pub async fn login(db: &DbHandle, req: LoginRequest) -> Result<PublicUser, ConsoleError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ConsoleError::InvalidCredentials);
    }

    let user = db
        .call(move |db| db.find_user_by_email(&email))
        .await
        .map_err(ConsoleError::Database)?
        .ok_or(ConsoleError::InvalidCredentials)?;

    let password = req.password;
    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ConsoleError::Other(anyhow::anyhow!("Verify task panicked: {}", e)))?;
    if !matches {
        tracing::debug!(user_id = user.id, "Password mismatch");
        return Err(ConsoleError::InvalidCredentials);
    }
    Ok(user.public())
}

/// Server-side sessions keyed by an opaque random token.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, PublicUser>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user: PublicUser) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(token.clone(), user);
        }
        token
    }

    pub fn get(&self, token: &str) -> Option<PublicUser> {
        self.sessions.lock().ok()?.get(token).cloned()
    }

    pub fn remove(&self, token: &str) -> Option<PublicUser> {
        self.sessions.lock().ok()?.remove(token)
    }

    /// Resolve the session named by the request's cookie, if any.
    pub fn user_for(&self, headers: &HeaderMap) -> Option<PublicUser> {
        session_token(headers).and_then(|token| self.get(&token))
    }
}

/// Extract the session token from `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
