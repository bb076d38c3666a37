pub mod api;
pub mod service;

pub use api::{
    grant_tokens as admin_grant_tokens, list_transactions as admin_list_transactions,
    overview as admin_overview, revoke_tokens as admin_revoke_tokens,
    set_privileges as admin_set_privileges,
};
pub use service::{
    AdminOverview, AdminService, GrantError, GrantReceipt, DEFAULT_GRANT_NOTE,
    DEFAULT_REVOKE_NOTE, OVERVIEW_TRANSACTIONS,
};
