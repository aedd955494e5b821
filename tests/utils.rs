#![allow(dead_code)]

use agentedu_migrate::db;
use agentedu_migrate::schema::{observe, Dialect};
use anyhow::Result;
use sqlx::{AnyConnection, Row};
use std::time::Duration;

/// Fresh private in-memory SQLite database.
pub async fn memory_db() -> Result<AnyConnection> {
    let conn = db::connect_url("sqlite::memory:", Duration::from_secs(5)).await?;
    Ok(conn)
}

pub async fn exec(conn: &mut AnyConnection, sql: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

/// `users(id INTEGER, email VARCHAR)`, the shape the auth columns were added to.
pub async fn create_users_table(conn: &mut AnyConnection) -> Result<()> {
    exec(
        conn,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR NOT NULL)",
    )
    .await
}

pub async fn create_progress_table(conn: &mut AnyConnection) -> Result<()> {
    exec(
        conn,
        "CREATE TABLE user_progress (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, scenario_id INTEGER)",
    )
    .await
}

pub async fn columns(conn: &mut AnyConnection, table: &str) -> Result<Vec<String>> {
    columns_of(conn, Dialect::Sqlite, table).await
}

pub async fn columns_of(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<String>> {
    let observed = observe(conn, dialect, table).await?;
    Ok(observed
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect())
}

/// First column of the first row, rendered as text by the query itself.
pub async fn scalar_text(conn: &mut AnyConnection, sql: &str) -> Result<String> {
    let row = sqlx::query(sql).fetch_one(&mut *conn).await?;
    Ok(row.try_get::<String, _>(0)?)
}
