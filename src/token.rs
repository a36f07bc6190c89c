//! Signed, expiring identity tokens (HS256 JWTs).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::{
    case_insensitive_string_ext::CaseInsensitiveStringExt,
    error::AuthError,
    types::{Claims, Identity, UserID, Username},
};

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const BEARER_PREFIX: &str = "bearer ";

/// Issues and verifies identity tokens with one symmetric secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

/// A verified token's identity plus its expiry (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub identity: Identity,
    pub expires_at: u64,
}

impl TokenCodec {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime,
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        self.issue_at(identity, unix_now())
    }

    pub(crate) fn issue_at(&self, identity: &Identity, issued_at: u64) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: identity.user_id.0,
            username: identity.username.0.clone(),
            iat: issued_at,
            exp: issued_at + self.lifetime.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|source| AuthError::TokenIssue { source })
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|source| {
            AuthError::InvalidToken {
                source: Some(source),
            }
        })?;

        Ok(VerifiedToken {
            identity: Identity {
                user_id: UserID(token.claims.user_id),
                username: Username(token.claims.username),
            },
            expires_at: token.claims.exp,
        })
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix_ignore_ascii_case(BEARER_PREFIX)
        .map(str::trim)
        .ok_or_else(AuthError::invalid_token)?;

    if token.is_empty() {
        return Err(AuthError::invalid_token());
    }

    Ok(token)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
