use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::models::ConversionRecord;

/// key: conversion-history -> one row per committed synthesis job
#[derive(Debug, Clone)]
pub struct NewConversion<'a> {
    pub account_id: i64,
    pub text_length: i64,
    pub tokens_used: i64,
    pub voice: &'a str,
    pub filename: &'a str,
}

/// Inserts the history row on the caller's transaction so it commits or rolls
/// back together with the debit.
pub(crate) async fn record_conversion(
    conn: &mut SqliteConnection,
    conversion: NewConversion<'_>,
) -> Result<ConversionRecord, sqlx::Error> {
    let created_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO conversions (account_id, text_length, tokens_used, voice, filename, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(conversion.account_id)
    .bind(conversion.text_length)
    .bind(conversion.tokens_used)
    .bind(conversion.voice)
    .bind(conversion.filename)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(ConversionRecord {
        id: result.last_insert_rowid(),
        account_id: conversion.account_id,
        text_length: conversion.text_length,
        tokens_used: conversion.tokens_used,
        voice: conversion.voice.to_string(),
        filename: conversion.filename.to_string(),
        created_at,
    })
}

pub async fn recent_conversions(
    pool: &SqlitePool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<ConversionRecord>, sqlx::Error> {
    sqlx::query_as::<_, ConversionRecord>(
        r#"
        SELECT id, account_id, text_length, tokens_used, voice, filename, created_at
        FROM conversions
        WHERE account_id = $1
        ORDER BY id DESC
        LIMIT $2
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_conversions(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM conversions")
        .fetch_one(pool)
        .await
}
