use std::sync::Arc;

use sqlx::SqlitePool;

use crate::accounts::AccountService;
use crate::admin::AdminService;
use crate::config::MeterConfig;
use crate::jobs::{CapabilityRegistry, JobOrchestrator};
use crate::metering::Ledger;
use crate::storage::ArtifactStore;

/// Shared handles injected into every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MeterConfig>,
    pub pool: SqlitePool,
    pub ledger: Ledger,
    pub accounts: AccountService,
    pub orchestrator: JobOrchestrator,
    pub admin: AdminService,
    pub store: ArtifactStore,
}

impl AppState {
    pub fn new(
        config: MeterConfig,
        pool: SqlitePool,
        registry: CapabilityRegistry,
        store: ArtifactStore,
    ) -> Self {
        let ledger = Ledger::new(pool.clone());
        let accounts = AccountService::new(ledger.clone());
        let orchestrator =
            JobOrchestrator::from_config(ledger.clone(), registry, store.clone(), &config);
        let admin = AdminService::new(accounts.clone(), ledger.clone(), config.features.admin);
        Self {
            config: Arc::new(config),
            pool,
            ledger,
            accounts,
            orchestrator,
            admin,
            store,
        }
    }
}
