use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};

use crate::state::AppState;
use crate::{admin, auth, jobs, metering};

/// Multipart framing on top of the largest accepted upload.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub async fn root() -> &'static str {
    "Media Meter API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/password", post(auth::change_password))
        .route("/api/jobs/synthesis", post(jobs::jobs_submit_synthesis))
        .route("/api/jobs/download", post(jobs::jobs_submit_download))
        .route(
            "/api/jobs/transcription",
            post(jobs::jobs_submit_transcription),
        )
        .route("/api/voices", get(jobs::jobs_list_voices))
        .route("/api/conversions", get(metering::metering_recent_conversions))
        .route("/api/transactions", get(metering::metering_list_transactions))
        .route("/api/pricing", get(metering::metering_list_pricing))
        .route("/api/admin/overview", get(admin::admin_overview))
        .route(
            "/api/admin/transactions",
            get(admin::admin_list_transactions),
        )
        .route("/api/admin/grants", post(admin::admin_grant_tokens))
        .route("/api/admin/revocations", post(admin::admin_revoke_tokens))
        .route("/api/admin/privileges", post(admin::admin_set_privileges))
}

/// Full application without the metrics endpoint, which the binary adds
/// together with the Prometheus layer.
pub fn app(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}
