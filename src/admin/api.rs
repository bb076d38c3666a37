use axum::{
    extract::{Extension, Query},
    Json,
};
use serde::Deserialize;

use super::{AdminOverview, GrantReceipt};
use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::metering::{Account, LimitQuery, TransactionView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenChangeRequest {
    pub email: String,
    pub amount: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrivilegeRequest {
    pub email: String,
    #[serde(default = "default_is_admin")]
    pub is_admin: bool,
}

fn default_is_admin() -> bool {
    true
}

/// key: admin-api -> dashboard + grants
pub async fn overview(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<AdminOverview>> {
    Ok(Json(state.admin.overview(account_id).await?))
}

pub async fn list_transactions(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<TransactionView>>> {
    let transactions = state
        .admin
        .recent_transactions(account_id, query.resolve(20))
        .await?;
    Ok(Json(transactions))
}

pub async fn grant_tokens(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(request): Json<TokenChangeRequest>,
) -> AppResult<Json<GrantReceipt>> {
    let receipt = state
        .admin
        .grant_tokens(
            account_id,
            &request.email,
            request.amount,
            request.note.as_deref(),
        )
        .await?;
    Ok(Json(receipt))
}

pub async fn revoke_tokens(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(request): Json<TokenChangeRequest>,
) -> AppResult<Json<GrantReceipt>> {
    let receipt = state
        .admin
        .revoke_tokens(
            account_id,
            &request.email,
            request.amount,
            request.note.as_deref(),
        )
        .await?;
    Ok(Json(receipt))
}

pub async fn set_privileges(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(request): Json<PrivilegeRequest>,
) -> AppResult<Json<Account>> {
    let account = state
        .admin
        .set_admin(account_id, &request.email, request.is_admin)
        .await?;
    Ok(Json(account))
}
