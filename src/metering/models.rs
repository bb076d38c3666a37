use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// key: metering-models -> accounts,ledger,conversions
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Grant,
    Use,
    Revoke,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Grant => "grant",
            TransactionKind::Use => "use",
            TransactionKind::Revoke => "revoke",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "grant" => Some(TransactionKind::Grant),
            "use" => Some(TransactionKind::Use),
            "revoke" => Some(TransactionKind::Revoke),
            _ => None,
        }
    }
}

/// key: metering-ledger-entry -> immutable journal row
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub actor_id: Option<i64>,
    pub amount: i64,
    pub kind: TransactionKind,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry joined with the emails of the account and the acting admin,
/// as shown on the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub account_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversionRecord {
    pub id: i64,
    pub account_id: i64,
    pub text_length: i64,
    pub tokens_used: i64,
    pub voice: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Result of comparing an account balance with the sum of its journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub account_id: i64,
    pub balance: i64,
    pub journal_sum: i64,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.journal_sum && self.balance >= 0
    }
}

/// A token pack offered on the pricing page.
#[derive(Debug, Clone, Serialize)]
pub struct PricingPlan {
    pub name: &'static str,
    pub tokens: i64,
    pub price: u32,
    pub description: &'static str,
    pub popular: bool,
}

pub const PRICING_PLANS: &[PricingPlan] = &[
    PricingPlan {
        name: "Basic",
        tokens: 100,
        price: 5,
        description: "Ideal for getting started",
        popular: false,
    },
    PricingPlan {
        name: "Standard",
        tokens: 500,
        price: 15,
        description: "Best value for money",
        popular: true,
    },
    PricingPlan {
        name: "Premium",
        tokens: 1000,
        price: 25,
        description: "Maximum savings for active users",
        popular: false,
    },
];

#[derive(sqlx::FromRow)]
pub(crate) struct LedgerEntryRow {
    pub id: i64,
    pub account_id: i64,
    pub actor_id: Option<i64>,
    pub amount: i64,
    pub kind: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct TransactionViewRow {
    pub id: i64,
    pub account_id: i64,
    pub actor_id: Option<i64>,
    pub amount: i64,
    pub kind: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub account_email: String,
    pub actor_email: Option<String>,
}
