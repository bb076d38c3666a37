use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

use super::models::{
    LedgerAudit, LedgerEntry, LedgerEntryRow, TransactionKind, TransactionView,
    TransactionViewRow,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: i64, available: i64 },
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("account {0} not found")]
    AccountNotFound(i64),
    #[error("corrupt ledger entry {id}: unknown kind `{kind}`")]
    CorruptEntry { id: i64, kind: String },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// key: ledger -> balances + append-only journal
///
/// Every balance mutation runs under a per-account async mutex and inside a
/// single database transaction that also appends the journal entry, so the
/// balance column always equals the sum of the account's entries. The
/// conditional `UPDATE ... WHERE tokens >= amount` keeps the balance
/// non-negative even if a writer bypasses the in-process lock.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Serializes balance mutations for one account. Holders must not
    /// acquire a second account lock.
    pub async fn lock_account(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(account_id).or_default().clone();
        lock.lock_owned().await
    }

    pub async fn balance(&self, account_id: i64) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        current_balance(&mut conn, account_id).await
    }

    pub async fn debit(
        &self,
        account_id: i64,
        amount: i64,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let _guard = self.lock_account(account_id).await;
        let mut tx = self.pool.begin().await?;
        let entry =
            apply_debit(&mut tx, account_id, amount, TransactionKind::Use, None, note).await?;
        tx.commit().await?;
        debug!(%account_id, amount, entry_id = entry.id, "ledger debit committed");
        Ok(entry)
    }

    pub async fn credit(
        &self,
        account_id: i64,
        amount: i64,
        note: &str,
        actor: Option<i64>,
    ) -> Result<LedgerEntry, LedgerError> {
        let _guard = self.lock_account(account_id).await;
        let mut tx = self.pool.begin().await?;
        let entry = apply_credit(&mut tx, account_id, amount, actor, note).await?;
        tx.commit().await?;
        debug!(%account_id, amount, ?actor, entry_id = entry.id, "ledger credit committed");
        Ok(entry)
    }

    /// Administrative removal of tokens, journaled as `revoke`.
    pub async fn revoke(
        &self,
        account_id: i64,
        amount: i64,
        note: &str,
        actor: i64,
    ) -> Result<LedgerEntry, LedgerError> {
        let _guard = self.lock_account(account_id).await;
        let mut tx = self.pool.begin().await?;
        let entry = apply_debit(
            &mut tx,
            account_id,
            amount,
            TransactionKind::Revoke,
            Some(actor),
            note,
        )
        .await?;
        tx.commit().await?;
        debug!(%account_id, amount, %actor, entry_id = entry.id, "ledger revoke committed");
        Ok(entry)
    }

    pub async fn entries(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, account_id, actor_id, amount, kind, note, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    pub async fn recent_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<TransactionView>, LedgerError> {
        let rows = sqlx::query_as::<_, TransactionViewRow>(
            r#"
            SELECT
                e.id,
                e.account_id,
                e.actor_id,
                e.amount,
                e.kind,
                e.note,
                e.created_at,
                a.email AS account_email,
                actor.email AS actor_email
            FROM ledger_entries e
            JOIN accounts a ON a.id = e.account_id
            LEFT JOIN accounts actor ON actor.id = e.actor_id
            ORDER BY e.id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = entry_from_row(LedgerEntryRow {
                id: row.id,
                account_id: row.account_id,
                actor_id: row.actor_id,
                amount: row.amount,
                kind: row.kind,
                note: row.note,
                created_at: row.created_at,
            })?;
            views.push(TransactionView {
                entry,
                account_email: row.account_email,
                actor_email: row.actor_email,
            });
        }
        Ok(views)
    }

    /// Compares the stored balance with the journal sum for one account.
    pub async fn verify(&self, account_id: i64) -> Result<LedgerAudit, LedgerError> {
        let _guard = self.lock_account(account_id).await;
        let mut conn = self.pool.acquire().await?;
        let balance = current_balance(&mut conn, account_id).await?;
        let journal_sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&mut *conn)
        .await?;

        let audit = LedgerAudit {
            account_id,
            balance,
            journal_sum,
        };
        if !audit.is_consistent() {
            error!(%account_id, balance, journal_sum, "ledger invariant violated");
        }
        Ok(audit)
    }
}

pub(crate) async fn current_balance(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<i64, LedgerError> {
    sqlx::query_scalar::<_, i64>("SELECT tokens FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))
}

/// Decrements the balance and appends a negative entry on `conn`. The caller
/// owns the surrounding transaction and the account lock.
pub(crate) async fn apply_debit(
    conn: &mut SqliteConnection,
    account_id: i64,
    amount: i64,
    kind: TransactionKind,
    actor: Option<i64>,
    note: &str,
) -> Result<LedgerEntry, LedgerError> {
    if amount < 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let updated = sqlx::query("UPDATE accounts SET tokens = tokens - $1 WHERE id = $2 AND tokens >= $1")
        .bind(amount)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    if updated.rows_affected() == 0 {
        let available = current_balance(conn, account_id).await?;
        return Err(LedgerError::InsufficientBalance {
            needed: amount,
            available,
        });
    }

    insert_entry(conn, account_id, actor, -amount, kind, note).await
}

/// Increments the balance and appends a `grant` entry on `conn`.
pub(crate) async fn apply_credit(
    conn: &mut SqliteConnection,
    account_id: i64,
    amount: i64,
    actor: Option<i64>,
    note: &str,
) -> Result<LedgerEntry, LedgerError> {
    if amount < 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let updated = sqlx::query("UPDATE accounts SET tokens = tokens + $1 WHERE id = $2")
        .bind(amount)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(LedgerError::AccountNotFound(account_id));
    }

    insert_entry(conn, account_id, actor, amount, TransactionKind::Grant, note).await
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    account_id: i64,
    actor: Option<i64>,
    amount: i64,
    kind: TransactionKind,
    note: &str,
) -> Result<LedgerEntry, LedgerError> {
    let created_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_entries (account_id, actor_id, amount, kind, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(account_id)
    .bind(actor)
    .bind(amount)
    .bind(kind.as_str())
    .bind(note)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(LedgerEntry {
        id: result.last_insert_rowid(),
        account_id,
        actor_id: actor,
        amount,
        kind,
        note: note.to_string(),
        created_at,
    })
}

fn entry_from_row(row: LedgerEntryRow) -> Result<LedgerEntry, LedgerError> {
    let kind = TransactionKind::from_str(&row.kind).ok_or_else(|| LedgerError::CorruptEntry {
        id: row.id,
        kind: row.kind.clone(),
    })?;
    Ok(LedgerEntry {
        id: row.id,
        account_id: row.account_id,
        actor_id: row.actor_id,
        amount: row.amount,
        kind,
        note: row.note,
        created_at: row.created_at,
    })
}
