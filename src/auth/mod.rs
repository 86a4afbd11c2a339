use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config;
use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub kind: TokenKind,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, email: String, role: Role, kind: TokenKind) -> Self {
        let now = Utc::now();
        let expiry_hours = match kind {
            TokenKind::Access => config::config().security.access_token_expiry_hours,
            TokenKind::Refresh => config::config().security.refresh_token_expiry_hours,
        };
        Self {
            user_id,
            email,
            role,
            kind,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Access + refresh token pair handed out at login / registration completion.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn generate_jwt(claims: &Claims) -> Result<String, AuthError> {
    let secret = &config::config().security.jwt_secret;
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = &config::config().security.jwt_secret;
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|e| AuthError::InvalidToken(format!("Invalid JWT token: {}", e)))?;
    Ok(data.claims)
}

pub fn issue_token_pair(user_id: Uuid, email: &str, role: Role) -> Result<TokenPair, AuthError> {
    let access = generate_jwt(&Claims::new(user_id, email.to_string(), role, TokenKind::Access))?;
    let refresh = generate_jwt(&Claims::new(
        user_id,
        email.to_string(),
        role,
        TokenKind::Refresh,
    ))?;
    Ok(TokenPair { access, refresh })
}

/// Salted SHA-256 password digest, stored as "salt$hexdigest".
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex: String = salt.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}${}", salt_hex, digest_with_salt(&salt_hex, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => digest_with_salt(salt, password) == digest,
        None => false,
    }
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One-time tokens for account activation, password reset and domain verification.
pub fn one_time_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let stored = hash_password("hunter22");
        assert!(verify_password("hunter22", &stored));
        assert!(!verify_password("hunter23", &stored));
    }

    #[test]
    fn password_digests_are_salted() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn jwt_roundtrip() {
        // Development config carries a usable secret
        std::env::remove_var("APP_ENV");
        let user_id = Uuid::new_v4();
        let claims = Claims::new(
            user_id,
            "org@example.com".to_string(),
            Role::Organization,
            TokenKind::Access,
        );
        let token = generate_jwt(&claims).expect("token");
        let decoded = decode_jwt(&token).expect("claims");
        assert_eq!(decoded.user_id, user_id);
        assert_eq!(decoded.role, Role::Organization);
        assert_eq!(decoded.kind, TokenKind::Access);
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(decode_jwt("not-a-token").is_err());
    }
}
