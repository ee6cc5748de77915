//! Bearer-token verification.
//!
//! Tokens are HS256 JWTs whose `sub` is the user id. Issuing tokens (sign
//! in, sign up) is the auth service's job; [`JwtAuth::issue`] exists for
//! tooling and tests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Display name, used to seed the user's profile on first contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(
        &self,
        user: &UserId,
        username: Option<&str>,
        ttl: Duration,
    ) -> Result<String, ServerError> {
        let claims = Claims {
            sub: user.to_string(),
            exp: (Utc::now() + ttl).timestamp().max(0) as u64,
            username: username.map(str::to_string),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServerError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            ServerError::Unauthenticated("invalid token".into())
        })?;
        if data.claims.sub.is_empty() {
            return Err(ServerError::Unauthenticated("token has no subject".into()));
        }
        Ok(data.claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller of a REST handler.
///
/// Extracting it verifies the bearer token and makes sure the caller has a
/// user row, so chat summaries can always resolve their profile.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(header)
            .ok_or_else(|| ServerError::Unauthenticated("missing bearer token".into()))?;

        let claims = state.auth.verify(token)?;
        let user = UserId(claims.sub);
        state.chats.ensure_user(&user, claims.username.as_deref())?;

        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let auth = JwtAuth::new("secret");
        let token = auth
            .issue(&"alice".into(), Some("Alice"), Duration::hours(1))
            .unwrap();
        let claims = auth.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.username.as_deref(), Some("Alice"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = JwtAuth::new("one")
            .issue(&"alice".into(), None, Duration::hours(1))
            .unwrap();
        let err = JwtAuth::new("two").verify(&token).unwrap_err();
        assert!(matches!(err, ServerError::Unauthenticated(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = JwtAuth::new("secret");
        let token = auth
            .issue(&"alice".into(), None, Duration::hours(-2))
            .unwrap();
        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
