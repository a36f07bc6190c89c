use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::AuthError,
    password::{self, HashCost},
    rate_limit::{RateLimitConfig, RateLimiter},
    store::UserDatabase,
    token::{TokenCodec, VerifiedToken, DEFAULT_TOKEN_LIFETIME},
    types::{HashedPassword, Identity, Username},
};

/// Signing secret used when none is configured. Only fit for local development.
pub const DEVELOPMENT_SECRET: &str = "super-secret-key-change-in-production";

#[derive(Clone)]
pub struct AuthConfig {
    /// The secret used to sign identity tokens.
    /// If the secret changes, all outstanding tokens stop verifying.
    pub auth_token_secret: String,
    /// How long tokens remain valid. After this interval the client has to log in again.
    pub auth_token_lifetime: Duration,
    /// Argon2 work factors for stored password hashes.
    pub hash_cost: HashCost,
    /// Throttle applied to register and login attempts.
    pub rate_limit: RateLimitConfig,
    /// Identify clients by `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
    pub database_connection: Arc<Mutex<dyn UserDatabase>>,
}

impl AuthConfig {
    /// Config with the stock token lifetime, hash cost and throttle. A missing
    /// secret falls back to [`DEVELOPMENT_SECRET`] with a warning.
    pub fn new(secret: Option<String>, database_connection: Arc<Mutex<dyn UserDatabase>>) -> Self {
        let auth_token_secret = match secret.filter(|secret| !secret.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set, using the development secret (NOT SECURE FOR PRODUCTION)");
                DEVELOPMENT_SECRET.to_string()
            }
        };

        Self {
            auth_token_secret,
            auth_token_lifetime: DEFAULT_TOKEN_LIFETIME,
            hash_cost: HashCost::default(),
            rate_limit: RateLimitConfig::default(),
            trust_forwarded_headers: false,
            database_connection,
        }
    }
}

pub(crate) struct AuthInternal {
    codec: TokenCodec,
    hash_cost: HashCost,
    rate_limiter: RateLimiter,
    pub(crate) trust_forwarded_headers: bool,
    database_connection: Arc<Mutex<dyn UserDatabase>>,
    // verified against when the username is unknown so both login failures cost the same
    decoy_hash: HashedPassword,
}

impl AuthInternal {
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn hash(&self, password: String) -> Result<HashedPassword, AuthError> {
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || password::hash(&password, &cost)).await?
    }

    pub async fn verify_hash(&self, password: String, hash: HashedPassword) -> Result<bool, AuthError> {
        Ok(tokio::task::spawn_blocking(move || password::verify(&password, &hash)).await?)
    }

    pub fn generate_token(&self, identity: &Identity) -> Result<String, AuthError> {
        self.codec.issue(identity)
    }

    pub fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.codec.verify(token)
    }

    pub async fn register(&self, username: String, password: String) -> Result<Identity, AuthError> {
        password::validate_username(&username)?;
        password::validate_password(&password)?;

        let username = Username(username);
        let hashed_password = self.hash(password).await?;

        let user_id = self
            .database_connection
            .lock()
            .await
            .create_user(&username, &hashed_password)
            .await?
            .ok_or(AuthError::UsernameAlreadyTaken)?;

        info!(user_id = user_id.0, username = %username.0, "registered user");
        Ok(Identity { user_id, username })
    }

    pub async fn login(&self, username: String, password: String) -> Result<Identity, AuthError> {
        let username = Username(username);

        let stored = self
            .database_connection
            .lock()
            .await
            .retrieve_user(&username)
            .await?;

        let Some((user_id, hashed_password)) = stored else {
            self.verify_hash(password, self.decoy_hash.clone()).await?;
            return Err(AuthError::LoginFailed);
        };

        if !self.verify_hash(password, hashed_password).await? {
            return Err(AuthError::LoginFailed);
        }

        Ok(Identity { user_id, username })
    }
}

#[derive(Clone)]
pub struct Auth {
    pub(crate) internal: Arc<AuthInternal>,
}

impl Auth {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let decoy_hash = password::hash("decoy-password", &config.hash_cost)?;

        Ok(Self {
            internal: Arc::new(AuthInternal {
                codec: TokenCodec::new(
                    config.auth_token_secret.as_bytes(),
                    config.auth_token_lifetime,
                ),
                hash_cost: config.hash_cost,
                rate_limiter: RateLimiter::new(config.rate_limit),
                trust_forwarded_headers: config.trust_forwarded_headers,
                database_connection: config.database_connection,
                decoy_hash,
            }),
        })
    }

    /// Evict idle entries from the login throttle. Meant to be called periodically.
    pub fn sweep_rate_limits(&self) -> usize {
        self.internal.rate_limiter.sweep()
    }
}
