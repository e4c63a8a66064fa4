//! Local mirror of the remote gym tables, keyed by (table, record id).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::mirror::MirrorRecord;
use crate::models::tables::TableName;
use crate::models::{format_timestamp, parse_timestamp};

#[derive(sqlx::FromRow)]
struct MirrorRow {
    table_name: String,
    record_id: String,
    data: String,
    updated_at: String,
}

impl TryFrom<MirrorRow> for MirrorRecord {
    type Error = String;

    fn try_from(row: MirrorRow) -> Result<Self, Self::Error> {
        Ok(MirrorRecord {
            table_name: row.table_name.parse()?,
            data: serde_json::from_str(&row.data)
                .map_err(|e| format!("Corrupt mirror row {}: {}", row.record_id, e))?,
            record_id: row.record_id,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

/// Fetch a single record
pub async fn get_record(
    pool: &SqlitePool,
    table: TableName,
    record_id: &str,
) -> Result<Option<MirrorRecord>, String> {
    let row = sqlx::query_as::<_, MirrorRow>(
        "SELECT table_name, record_id, data, updated_at FROM mirror_records
         WHERE table_name = ? AND record_id = ?",
    )
    .bind(table.as_str())
    .bind(record_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| format!("Failed to fetch {} {}: {}", table, record_id, e))?;

    row.map(MirrorRecord::try_from).transpose()
}

/// Insert or overwrite a record by primary key
pub async fn put_record(
    conn: &mut SqliteConnection,
    table: TableName,
    record_id: &str,
    data: &Value,
) -> Result<(), String> {
    let data = serde_json::to_string(data)
        .map_err(|e| format!("Failed to serialize {} {}: {}", table, record_id, e))?;

    sqlx::query(
        "INSERT INTO mirror_records (table_name, record_id, data, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(table_name, record_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
    )
    .bind(table.as_str())
    .bind(record_id)
    .bind(&data)
    .bind(format_timestamp(Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to store {} {}: {}", table, record_id, e))?;

    Ok(())
}

/// Delete a record. Returns false if it was not there.
pub async fn delete_record(
    conn: &mut SqliteConnection,
    table: TableName,
    record_id: &str,
) -> Result<bool, String> {
    let result = sqlx::query("DELETE FROM mirror_records WHERE table_name = ? AND record_id = ?")
        .bind(table.as_str())
        .bind(record_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to delete {} {}: {}", table, record_id, e))?;

    Ok(result.rows_affected() > 0)
}

/// List all records of a table
pub async fn list_records(pool: &SqlitePool, table: TableName) -> Result<Vec<MirrorRecord>, String> {
    let rows = sqlx::query_as::<_, MirrorRow>(
        "SELECT table_name, record_id, data, updated_at FROM mirror_records
         WHERE table_name = ? ORDER BY record_id",
    )
    .bind(table.as_str())
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to list {}: {}", table, e))?;

    rows.into_iter().map(MirrorRecord::try_from).collect()
}

/// Remote base copies of a table, keyed by record id
pub async fn list_bases(pool: &SqlitePool, table: TableName) -> Result<HashMap<String, Value>, String> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT record_id, data FROM remote_base WHERE table_name = ?")
            .bind(table.as_str())
            .fetch_all(pool)
            .await
            .map_err(|e| format!("Failed to list {} base copies: {}", table, e))?;

    rows.into_iter()
        .map(|(record_id, data)| {
            let data = serde_json::from_str(&data)
                .map_err(|e| format!("Corrupt base copy {}: {}", record_id, e))?;
            Ok((record_id, data))
        })
        .collect()
}

/// Remember `data` as the copy the remote store currently holds
pub async fn put_base(
    conn: &mut SqliteConnection,
    table: TableName,
    record_id: &str,
    data: &Value,
) -> Result<(), String> {
    let data = serde_json::to_string(data)
        .map_err(|e| format!("Failed to serialize {} {}: {}", table, record_id, e))?;

    sqlx::query(
        "INSERT INTO remote_base (table_name, record_id, data) VALUES (?, ?, ?)
         ON CONFLICT(table_name, record_id) DO UPDATE SET data = excluded.data",
    )
    .bind(table.as_str())
    .bind(record_id)
    .bind(&data)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to store base copy of {} {}: {}", table, record_id, e))?;

    Ok(())
}

pub async fn delete_base(
    conn: &mut SqliteConnection,
    table: TableName,
    record_id: &str,
) -> Result<(), String> {
    sqlx::query("DELETE FROM remote_base WHERE table_name = ? AND record_id = ?")
        .bind(table.as_str())
        .bind(record_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to drop base copy of {} {}: {}", table, record_id, e))?;

    Ok(())
}

pub async fn count_records(pool: &SqlitePool, table: TableName) -> Result<i64, String> {
    sqlx::query_scalar("SELECT COUNT(*) FROM mirror_records WHERE table_name = ?")
        .bind(table.as_str())
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count {}: {}", table, e))
}
