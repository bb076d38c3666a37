mod common;

use common::{harness, harness_with, only, Fakes};
use media_meter::admin::{GrantError, DEFAULT_GRANT_NOTE};
use media_meter::config::FeatureFlags;
use media_meter::metering::TransactionKind;

#[tokio::test]
async fn grant_is_attributed_to_the_administrator() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;
    let user = h.account("user@example.com", 5).await;

    let receipt = h
        .state
        .admin
        .grant_tokens(admin, "USER@example.com ", 40, None)
        .await
        .unwrap();

    assert_eq!(receipt.target_email, "user@example.com");
    assert_eq!(receipt.balance_after, 45);
    assert_eq!(receipt.entry.kind, TransactionKind::Grant);
    assert_eq!(receipt.entry.actor_id, Some(admin));
    assert_eq!(receipt.entry.note, DEFAULT_GRANT_NOTE);
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn unknown_target_writes_nothing() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;

    let err = h
        .state
        .admin
        .grant_tokens(admin, "ghost@example.com", 10, Some("welcome"))
        .await
        .unwrap_err();

    assert!(matches!(err, GrantError::TargetNotFound(ref email) if email == "ghost@example.com"));
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
        .fetch_one(&h.state.pool)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;
    let user = h.account("user@example.com", 5).await;

    for amount in [0, -7] {
        let err = h
            .state
            .admin
            .grant_tokens(admin, "user@example.com", amount, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::InvalidAmount(value) if value == amount));
    }
    assert_eq!(h.entry_count(user).await, 1);
}

#[tokio::test]
async fn regular_users_cannot_grant() {
    let h = harness().await;
    let user = h.account("user@example.com", 5).await;
    h.account("friend@example.com", 0).await;

    let err = h
        .state
        .admin
        .grant_tokens(user, "friend@example.com", 100, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GrantError::Forbidden));
    assert_eq!(err.code(), "forbidden");
}

#[tokio::test]
async fn disabled_administration_refuses_everything() {
    let h = harness_with(
        Fakes::default(),
        only(FeatureFlags {
            admin: false,
            ..FeatureFlags::all()
        }),
    )
    .await;
    let admin = h.admin("root@example.com", 0).await;
    h.account("user@example.com", 0).await;

    let err = h
        .state
        .admin
        .grant_tokens(admin, "user@example.com", 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::FeatureDisabled));
    assert!(matches!(
        h.state.admin.overview(admin).await,
        Err(GrantError::FeatureDisabled)
    ));
}

#[tokio::test]
async fn administrators_may_top_up_their_own_balance() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;

    let receipt = h
        .state
        .admin
        .grant_tokens(admin, "root@example.com", 10, Some("float"))
        .await
        .unwrap();

    assert_eq!(receipt.balance_after, 10);
    assert_eq!(receipt.entry.note, "float");
}

#[tokio::test]
async fn administrators_cannot_change_their_own_privileges() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;

    let err = h
        .state
        .admin
        .set_admin(admin, "root@example.com", false)
        .await
        .unwrap_err();

    assert!(matches!(err, GrantError::SelfGrantRejected));
    let account = h.state.accounts.find(admin).await.unwrap().unwrap();
    assert!(account.is_admin);
}

#[tokio::test]
async fn promoted_user_can_then_grant() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;
    let user = h.account("user@example.com", 0).await;
    h.account("third@example.com", 0).await;

    let promoted = h
        .state
        .admin
        .set_admin(admin, "user@example.com", true)
        .await
        .unwrap();
    assert!(promoted.is_admin);

    let receipt = h
        .state
        .admin
        .grant_tokens(user, "third@example.com", 3, None)
        .await
        .unwrap();
    assert_eq!(receipt.entry.actor_id, Some(user));
}

#[tokio::test]
async fn revoke_cannot_push_a_balance_below_zero() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;
    let user = h.account("user@example.com", 8).await;

    let receipt = h
        .state
        .admin
        .revoke_tokens(admin, "user@example.com", 5, Some("chargeback"))
        .await
        .unwrap();
    assert_eq!(receipt.entry.kind, TransactionKind::Revoke);
    assert_eq!(receipt.entry.amount, -5);
    assert_eq!(receipt.balance_after, 3);

    let err = h
        .state
        .admin
        .revoke_tokens(admin, "user@example.com", 5, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GrantError::InsufficientBalance {
            needed: 5,
            available: 3
        }
    ));
    assert_eq!(h.balance(user).await, 3);
    h.assert_consistent(user).await;
}

#[tokio::test]
async fn overview_summarizes_accounts_and_activity() {
    let h = harness().await;
    let admin = h.admin("root@example.com", 0).await;
    h.account("user@example.com", 5).await;
    h.state
        .admin
        .grant_tokens(admin, "user@example.com", 5, None)
        .await
        .unwrap();

    let overview = h.state.admin.overview(admin).await.unwrap();
    assert_eq!(overview.total_accounts, 2);
    assert_eq!(overview.total_conversions, 0);
    assert_eq!(overview.recent_transactions.len(), 2);
    assert_eq!(
        overview.recent_transactions[0].actor_email.as_deref(),
        Some("root@example.com")
    );
}
