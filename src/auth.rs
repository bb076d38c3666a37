use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, AUTH_COOKIE};
use crate::metering::Account;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i64,
    role: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub tokens: i64,
}

impl From<&Account> for UserInfo {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            role: role_of(account).to_string(),
            tokens: account.tokens,
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

fn role_of(account: &Account) -> &'static str {
    if account.is_admin {
        "admin"
    } else {
        "user"
    }
}

/// Signs a 24 hour session token for `account`.
pub fn issue_token(account: &Account) -> AppResult<String> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Message("Token expiry out of range".into()))?
        .timestamp() as usize;
    let claims = Claims {
        sub: account.id,
        role: role_of(account).to_string(),
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

fn session_cookie(value: String) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        value
            .parse()
            .map_err(|_| AppError::Message("Invalid cookie value".into()))?,
    );
    Ok(headers)
}

pub async fn register_user(
    Extension(state): Extension<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserInfo>)> {
    let account = state
        .accounts
        .register(
            &payload.email,
            &payload.password,
            state.config.signup_bonus_tokens,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(UserInfo::from(&account))))
}

pub async fn login_user(
    Extension(state): Extension<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let account = state
        .accounts
        .authenticate(&payload.email, &payload.password)
        .await?;
    let token = issue_token(&account)?;
    let headers = session_cookie(format!(
        "{AUTH_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Path=/"
    ))?;
    Ok((
        headers,
        Json(LoginResponse {
            token,
            user: UserInfo::from(&account),
        }),
    ))
}

pub async fn logout_user() -> AppResult<(HeaderMap, &'static str)> {
    let headers = session_cookie(format!("{AUTH_COOKIE}=deleted; HttpOnly; Path=/; Max-Age=0"))?;
    Ok((headers, "Logged out"))
}

pub async fn current_user(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let account = state
        .accounts
        .find(account_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(UserInfo::from(&account)))
}

pub async fn change_password(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    if !state.config.features.profile {
        return Err(AppError::FeatureDisabled("profile"));
    }
    state
        .accounts
        .change_password(account_id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
