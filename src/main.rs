use std::net::SocketAddr;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use media_meter::jobs::JobKind;
use media_meter::{config, db, routes, AppState, ArtifactStore, CapabilityRegistry, EngineSet, MeterConfig};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();

    let meter_config = MeterConfig::from_env();
    let pool = db::connect(config::DATABASE_URL.as_str(), 5).await?;
    db::migrate(&pool).await?;

    let store = ArtifactStore::from_config(&meter_config);
    let enabled: Vec<JobKind> = JobKind::ALL
        .into_iter()
        .filter(|kind| meter_config.features.is_enabled(*kind))
        .collect();
    store.ensure_dirs(&enabled).await?;

    let engines = EngineSet::from_binaries(&meter_config.engines);
    let registry = CapabilityRegistry::from_config(&meter_config, engines);
    let state = AppState::new(meter_config, pool, registry, store);

    if let Some(admin) = state.accounts.ensure_default_admin(&state.config).await? {
        tracing::info!(account_id = admin.id, email = %admin.email, "created default administrator");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = routes::app(state)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
