use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Session state carried by the client as a signed token.
///
/// `sub` is the account ID of a logged-in user and `admin` is set once the
/// admin key was presented. Logging out of either means issuing a replacement
/// token with the field cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn anonymous() -> Self {
        Self {
            sid: Uuid::new_v4(),
            sub: None,
            admin: false,
            iat: 0,
            exp: 0,
        }
    }

    pub fn for_user(account_id: impl Into<String>) -> Self {
        Self {
            sub: Some(account_id.into()),
            ..Self::anonymous()
        }
    }

    pub fn with_user(mut self, account_id: Option<String>) -> Self {
        self.sub = account_id;
        self
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn account_id(&self) -> Option<&str> {
        self.sub.as_deref()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session secret not configured")]
    InvalidSecret,

    #[error("Session token expired")]
    Expired,

    #[error("Invalid session token: {0}")]
    Invalid(String),

    #[error("Session token generation error: {0}")]
    TokenGeneration(String),
}

/// Signs and verifies session tokens (HS256)
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_hours: u64,
}

impl SessionKeys {
    pub fn new(secret: &str, expiry_hours: u64) -> Result<Self, SessionError> {
        if secret.is_empty() {
            return Err(SessionError::InvalidSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        })
    }

    /// Stamp `iat`/`exp` on the claims and sign them
    pub fn issue(&self, mut claims: Claims) -> Result<String, SessionError> {
        let now = Utc::now();
        claims.iat = now.timestamp();
        claims.exp = (now + Duration::hours(self.expiry_hours as i64)).timestamp();

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::TokenGeneration(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(e.to_string()),
            })
    }
}

/// SHA-256 hex digest used to store account passwords
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compare two secrets without short-circuiting on the first differing byte
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
