pub mod api;
pub mod conversions;
pub mod ledger;
pub mod models;
pub mod pricing;

pub use api::{
    list_pricing as metering_list_pricing, list_transactions as metering_list_transactions,
    recent_conversions as metering_recent_conversions, LimitQuery,
};
pub use conversions::{count_conversions, recent_conversions, NewConversion};
pub use ledger::{Ledger, LedgerError};
pub use models::{
    Account, ConversionRecord, LedgerAudit, LedgerEntry, PricingPlan, TransactionKind,
    TransactionView, PRICING_PLANS,
};
pub use pricing::{normalize_tts_text, CostBasis, CostPolicy, VIDEO_DOWNLOAD_TOKENS};
