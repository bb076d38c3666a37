use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::accounts::{AccountError, AccountService};
use crate::metering::{
    count_conversions, Account, Ledger, LedgerEntry, LedgerError, TransactionView,
};

pub const DEFAULT_GRANT_NOTE: &str = "Granted by administrator";
pub const DEFAULT_REVOKE_NOTE: &str = "Revoked by administrator";
pub const OVERVIEW_TRANSACTIONS: i64 = 20;

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("administration is disabled")]
    FeatureDisabled,
    #[error("administrator privileges required")]
    Forbidden,
    #[error("no account registered for {0}")]
    TargetNotFound(String),
    #[error("administrators cannot change their own privileges")]
    SelfGrantRejected,
    #[error("token amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("cannot revoke {needed} tokens, account holds {available}")]
    InsufficientBalance { needed: i64, available: i64 },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl GrantError {
    pub fn code(&self) -> &'static str {
        match self {
            GrantError::FeatureDisabled => "feature_disabled",
            GrantError::Forbidden => "forbidden",
            GrantError::TargetNotFound(_) => "target_not_found",
            GrantError::SelfGrantRejected => "self_grant_rejected",
            GrantError::InvalidAmount(_) => "invalid_amount",
            GrantError::InsufficientBalance { .. } => "insufficient_balance",
            GrantError::Ledger(_) | GrantError::Account(_) | GrantError::Db(_) => {
                "storage_error"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantReceipt {
    pub target_email: String,
    pub entry: LedgerEntry,
    pub balance_after: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminOverview {
    pub total_accounts: i64,
    pub total_conversions: i64,
    pub accounts: Vec<Account>,
    pub recent_transactions: Vec<TransactionView>,
}

/// key: admin-grants -> attributed credits, revocations, privilege changes
#[derive(Clone)]
pub struct AdminService {
    accounts: AccountService,
    ledger: Ledger,
    enabled: bool,
}

impl AdminService {
    pub fn new(accounts: AccountService, ledger: Ledger, enabled: bool) -> Self {
        Self {
            accounts,
            ledger,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn authorize(&self, actor_id: i64) -> Result<Account, GrantError> {
        if !self.enabled {
            return Err(GrantError::FeatureDisabled);
        }
        match self.accounts.find(actor_id).await? {
            Some(actor) if actor.is_admin => Ok(actor),
            _ => Err(GrantError::Forbidden),
        }
    }

    async fn target(&self, email: &str) -> Result<Account, GrantError> {
        self.accounts
            .find_by_email(email)
            .await?
            .ok_or_else(|| GrantError::TargetNotFound(email.trim().to_string()))
    }

    /// Credits `amount` tokens to the account registered under `target_email`,
    /// attributed to `actor_id`.
    pub async fn grant_tokens(
        &self,
        actor_id: i64,
        target_email: &str,
        amount: i64,
        note: Option<&str>,
    ) -> Result<GrantReceipt, GrantError> {
        let actor = self.authorize(actor_id).await?;
        if amount <= 0 {
            return Err(GrantError::InvalidAmount(amount));
        }
        let target = self.target(target_email).await?;
        if target.id == actor.id {
            warn!(%actor_id, amount, "administrator granted tokens to own account");
        }

        let note = note
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .unwrap_or(DEFAULT_GRANT_NOTE);
        let entry = self
            .ledger
            .credit(target.id, amount, note, Some(actor.id))
            .await
            .map_err(|err| ledger_failure(err, &target.email))?;
        let balance_after = self.ledger.balance(target.id).await.map_err(GrantError::Ledger)?;

        info!(%actor_id, target_id = target.id, amount, balance_after, "tokens granted");
        metrics::increment_counter!("media_meter_grants_total", "kind" => "grant");
        Ok(GrantReceipt {
            target_email: target.email,
            entry,
            balance_after,
        })
    }

    pub async fn revoke_tokens(
        &self,
        actor_id: i64,
        target_email: &str,
        amount: i64,
        note: Option<&str>,
    ) -> Result<GrantReceipt, GrantError> {
        let actor = self.authorize(actor_id).await?;
        if amount <= 0 {
            return Err(GrantError::InvalidAmount(amount));
        }
        let target = self.target(target_email).await?;

        let note = note
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .unwrap_or(DEFAULT_REVOKE_NOTE);
        let entry = self
            .ledger
            .revoke(target.id, amount, note, actor.id)
            .await
            .map_err(|err| ledger_failure(err, &target.email))?;
        let balance_after = self.ledger.balance(target.id).await.map_err(GrantError::Ledger)?;

        info!(%actor_id, target_id = target.id, amount, balance_after, "tokens revoked");
        metrics::increment_counter!("media_meter_grants_total", "kind" => "revoke");
        Ok(GrantReceipt {
            target_email: target.email,
            entry,
            balance_after,
        })
    }

    /// Grants or withdraws administrator privileges. Actors can never change
    /// their own flag.
    pub async fn set_admin(
        &self,
        actor_id: i64,
        target_email: &str,
        is_admin: bool,
    ) -> Result<Account, GrantError> {
        let actor = self.authorize(actor_id).await?;
        let target = self.target(target_email).await?;
        if target.id == actor.id {
            return Err(GrantError::SelfGrantRejected);
        }

        let updated = match self.accounts.set_admin(target.id, is_admin).await {
            Ok(account) => account,
            Err(AccountError::NotFound) => return Err(GrantError::TargetNotFound(target.email)),
            Err(err) => return Err(err.into()),
        };
        info!(%actor_id, target_id = updated.id, is_admin, "privileges changed");
        Ok(updated)
    }

    pub async fn overview(&self, actor_id: i64) -> Result<AdminOverview, GrantError> {
        self.authorize(actor_id).await?;
        let accounts = self.accounts.list().await?;
        let total_conversions = count_conversions(self.ledger.pool()).await?;
        let recent_transactions = self
            .ledger
            .recent_transactions(OVERVIEW_TRANSACTIONS)
            .await
            .map_err(GrantError::Ledger)?;

        Ok(AdminOverview {
            total_accounts: accounts.len() as i64,
            total_conversions,
            accounts,
            recent_transactions,
        })
    }

    pub async fn recent_transactions(
        &self,
        actor_id: i64,
        limit: i64,
    ) -> Result<Vec<TransactionView>, GrantError> {
        self.authorize(actor_id).await?;
        self.ledger
            .recent_transactions(limit)
            .await
            .map_err(GrantError::Ledger)
    }
}

fn ledger_failure(err: LedgerError, email: &str) -> GrantError {
    match err {
        LedgerError::AccountNotFound(_) => GrantError::TargetNotFound(email.to_string()),
        LedgerError::InvalidAmount(amount) => GrantError::InvalidAmount(amount),
        LedgerError::InsufficientBalance { needed, available } => {
            GrantError::InsufficientBalance { needed, available }
        }
        other => GrantError::Ledger(other),
    }
}
