//! JWT verification (HS256)
//!
//! Tokens are issued by the identity service sharing `JWT_SECRET`; this
//! server only verifies them.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEV_SECRET: &str = "backoffice-development-secret-change-me";

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

impl JwtConfig {
    /// `JWT_SECRET`, `JWT_ISSUER`, `JWT_AUDIENCE`
    ///
    /// A missing secret falls back to a development key; production refuses
    /// to start without one (see `Config::validate`).
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using development key");
            DEV_SECRET.to_string()
        });
        Self {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "backoffice".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "backoffice".into()),
        }
    }

    pub fn is_development_key(&self) -> bool {
        self.secret == DEV_SECRET
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_SECRET.to_string(),
            issuer: "backoffice".into(),
            audience: "backoffice".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub venue_id: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub aud: String,
}

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.config.issuer)
            .field("audience", &self.config.audience)
            .finish()
    }
}

impl JwtService {
    pub fn with_config(config: JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            decoding_key,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss", "aud"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    pub fn extract_from_header(header: &str) -> Option<&str> {
        header.strip_prefix("Bearer ")
    }
}

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub venue_id: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            name: claims.name,
            venue_id: claims.venue_id,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Exact match, `domain:*` wildcard, or `all`
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        self.permissions.iter().any(|p| {
            p == "all"
                || p == permission
                || p.strip_suffix(":*").is_some_and(|prefix| {
                    permission
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with(':'))
                })
        })
    }

    /// Whether the caller may act on `venue_id`
    pub fn can_access_venue(&self, venue_id: &str) -> bool {
        self.is_admin() || self.venue_id == venue_id
    }
}
