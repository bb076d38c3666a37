use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Deserialize)]
struct Claims {
    sub: i64,
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Authenticated caller, taken from the `auth_token` cookie or a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: i64,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_cookie = parts
        .headers
        .get(axum::http::header::COOKIE)
        .and_then(|header| header.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(AUTH_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(str::to_string)
            })
        });
    from_cookie.or_else(|| {
        parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token =
            token_from_parts(parts).ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        Ok(AuthUser {
            account_id: decoded.claims.sub,
            role: decoded.claims.role,
        })
    }
}
