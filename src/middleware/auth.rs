use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{decode_jwt, Claims, TokenKind};
use crate::error::ApiError;
use crate::models::Role;

/// Authenticated user context extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl AuthUser {
    /// Organization-gated endpoints: the caller id doubles as the tenant id.
    pub fn require_organization(&self) -> Result<Uuid, ApiError> {
        if self.role == Role::Organization {
            Ok(self.user_id)
        } else {
            Err(ApiError::forbidden("Organization role required"))
        }
    }

    pub fn require_employee(&self) -> Result<Uuid, ApiError> {
        if self.role == Role::Employee {
            Ok(self.user_id)
        } else {
            Err(ApiError::forbidden("Employee role required"))
        }
    }
}

/// JWT authentication middleware that validates access tokens and injects
/// the user context into the request extensions.
pub async fn jwt_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;

    let claims = decode_jwt(&token)?;
    if claims.kind != TokenKind::Access {
        return Err(ApiError::unauthorized("Access token required"));
    }

    request.extensions_mut().insert(AuthUser::from(claims));
    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_gates() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: "e@example.com".to_string(),
            role: Role::Employee,
        };
        assert!(user.require_employee().is_ok());
        assert!(user.require_organization().is_err());
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", "Token abc".parse().unwrap());
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc");
    }
}
