use axum::{
    extract::{Extension, Query},
    Json,
};
use serde::Deserialize;

use super::{ConversionRecord, LedgerEntry, PricingPlan, PRICING_PLANS};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolve(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, 100)
    }
}

/// key: metering-api -> dashboard history
pub async fn recent_conversions(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<ConversionRecord>>> {
    let conversions =
        super::recent_conversions(&state.pool, account_id, query.resolve(10)).await?;
    Ok(Json(conversions))
}

pub async fn list_transactions(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    let entries = state.ledger.entries(account_id, query.resolve(20)).await?;
    Ok(Json(entries))
}

pub async fn list_pricing(
    Extension(state): Extension<AppState>,
) -> AppResult<Json<&'static [PricingPlan]>> {
    if !state.config.features.pricing {
        return Err(AppError::FeatureDisabled("pricing"));
    }
    Ok(Json(PRICING_PLANS))
}
