//! Token issuing and verification.
//!
//! Tokens are HS256 JWTs whose subject is the user id. Verification also
//! resolves the subject against the store so tokens of deleted users stop
//! working immediately.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use roomcast_config::AuthConfig;
use roomcast_database::{ChatStore, StoreError, User};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on configured token lifetimes (ten years).
const MAX_TOKEN_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("unknown user")]
    UnknownUser,
    #[error("failed to issue token: {0}")]
    TokenCreation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn ChatStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    leeway_seconds: u64,
}

impl Authenticator {
    pub fn new(store: Arc<dyn ChatStore>, config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_ttl: Duration::seconds(config.token_ttl_seconds.min(MAX_TOKEN_TTL_SECONDS) as i64),
            leeway_seconds: config.leeway_seconds,
        }
    }

    pub fn issue_token(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::TokenCreation(err.to_string()))?;

        debug!(user_id, %expires_at, "issued token");
        Ok(IssuedToken { token, expires_at })
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(err.to_string()),
            })
    }

    /// Resolve a bearer token to the user it was issued for.
    pub async fn verify(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.decode_claims(token)?;

        match self.store.find_user(&claims.sub).await? {
            Some(user) => Ok(user),
            None => {
                warn!(user_id = %claims.sub, "token subject does not exist");
                Err(AuthError::UnknownUser)
            }
        }
    }
}
