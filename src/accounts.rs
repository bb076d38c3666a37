use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use rand_core::OsRng;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MeterConfig;
use crate::metering::ledger::apply_credit;
use crate::metering::{Account, Ledger, LedgerError};

pub const MIN_PASSWORD_LENGTH: usize = 6;

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, is_admin, tokens, created_at";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("email is already registered")]
    EmailTaken,
    #[error("email address is not valid")]
    InvalidEmail,
    #[error("{0}")]
    WeakPassword(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account not found")]
    NotFound,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::EmailTaken => "email_taken",
            AccountError::InvalidEmail => "invalid_email",
            AccountError::WeakPassword(_) => "weak_password",
            AccountError::InvalidCredentials => "invalid_credentials",
            AccountError::NotFound => "not_found",
            AccountError::Hash(_) | AccountError::Ledger(_) | AccountError::Db(_) => {
                "storage_error"
            }
        }
    }
}

pub fn normalize_email(email: &str) -> Result<String, AccountError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AccountError::InvalidEmail)
    }
}

fn check_password_strength(password: &str) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AccountError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AccountError::Hash(err.to_string()))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AccountError> {
    let parsed = PasswordHash::new(stored).map_err(|err| AccountError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

/// key: accounts -> identities, credentials, bonus credit through the ledger
#[derive(Clone)]
pub struct AccountService {
    pool: SqlitePool,
    ledger: Ledger,
}

impl AccountService {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            pool: ledger.pool().clone(),
            ledger,
        }
    }

    /// Creates the account with a zero balance and credits `bonus` as an
    /// unattributed grant in the same transaction.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        bonus: i64,
    ) -> Result<Account, AccountError> {
        let email = normalize_email(email)?;
        check_password_strength(password)?;
        let hash = hash_password(password)?;

        let mut tx = self.pool.begin().await?;
        let account_id = match insert_account(&mut tx, &email, &hash, false).await {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => return Err(AccountError::EmailTaken),
            Err(err) => return Err(err.into()),
        };
        if bonus > 0 {
            apply_credit(&mut tx, account_id, bonus, None, "Signup bonus").await?;
        }
        tx.commit().await?;

        info!(%account_id, bonus, "account registered");
        self.find(account_id).await?.ok_or(AccountError::NotFound)
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Account, AccountError> {
        let email = normalize_email(email).map_err(|_| AccountError::InvalidCredentials)?;
        let account = self
            .find_by_email(&email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;
        if !verify_password(password, &account.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }
        Ok(account)
    }

    pub async fn find(&self, account_id: i64) -> Result<Option<Account>, AccountError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let email = email.trim().to_ascii_lowercase();
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    pub async fn change_password(
        &self,
        account_id: i64,
        current: &str,
        new: &str,
    ) -> Result<(), AccountError> {
        let account = self.find(account_id).await?.ok_or(AccountError::NotFound)?;
        if !verify_password(current, &account.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }
        check_password_strength(new)?;
        let hash = hash_password(new)?;
        sqlx::query("UPDATE accounts SET password_hash = $1 WHERE id = $2")
            .bind(hash)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        info!(%account_id, "password changed");
        Ok(())
    }

    /// Flips the privilege flag. Balance columns are left to the ledger.
    pub async fn set_admin(&self, account_id: i64, is_admin: bool) -> Result<Account, AccountError> {
        let updated = sqlx::query("UPDATE accounts SET is_admin = $1 WHERE id = $2")
            .bind(is_admin)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AccountError::NotFound);
        }
        self.find(account_id).await?.ok_or(AccountError::NotFound)
    }

    /// Creates the configured administrator on first start. Returns the new
    /// account, or `None` when it already exists.
    pub async fn ensure_default_admin(
        &self,
        config: &MeterConfig,
    ) -> Result<Option<Account>, AccountError> {
        let email = normalize_email(&config.default_admin_email)?;
        if self.find_by_email(&email).await?.is_some() {
            return Ok(None);
        }

        let hash = hash_password(&config.default_admin_password)?;
        let mut tx = self.pool.begin().await?;
        let account_id = insert_account(&mut tx, &email, &hash, true).await?;
        if config.default_admin_tokens > 0 {
            apply_credit(
                &mut tx,
                account_id,
                config.default_admin_tokens,
                None,
                "Initial administrator balance",
            )
            .await?;
        }
        tx.commit().await?;

        warn!(%email, "default administrator created; change its password after first login");
        self.find(account_id).await
    }

    pub async fn list(&self) -> Result<Vec<Account>, AccountError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn count(&self) -> Result<i64, AccountError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

async fn insert_account(
    conn: &mut SqliteConnection,
    email: &str,
    password_hash: &str,
    is_admin: bool,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (email, password_hash, is_admin, tokens, created_at)
        VALUES ($1, $2, $3, 0, $4)
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(is_admin)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}
