use sqlx::{AnyConnection, Row};

use crate::schema::{Dialect, EvolveError};

/// Single-row table recording the applied head of the revision chain.
#[derive(Debug, Clone)]
pub struct VersionTable {
    name: String,
    dialect: Dialect,
}

impl VersionTable {
    /// `name` must already be a validated identifier.
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            name: name.into(),
            dialect,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn ensure(&self, conn: &mut AnyConnection) -> Result<(), EvolveError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(64) NOT NULL PRIMARY KEY)",
            self.name
        );
        run(conn, &statement).await
    }

    pub async fn current(&self, conn: &mut AnyConnection) -> Result<Option<String>, EvolveError> {
        let query = format!("SELECT version_num FROM {}", self.name);
        let row = sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| EvolveError::from_sqlx(e, &query, &[]))?;

        match row {
            Some(row) => {
                let version: String = row
                    .try_get("version_num")
                    .map_err(|e| EvolveError::from_sqlx(e, &query, &[]))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// Replace the recorded head; `None` clears it.
    pub async fn set(&self, conn: &mut AnyConnection, version: Option<&str>) -> Result<(), EvolveError> {
        run(conn, &format!("DELETE FROM {}", self.name)).await?;

        if let Some(version) = version {
            let statement = format!(
                "INSERT INTO {} (version_num) VALUES ({})",
                self.name,
                self.dialect.placeholder(1)
            );
            sqlx::query(&statement)
                .bind(version)
                .execute(&mut *conn)
                .await
                .map_err(|e| EvolveError::from_sqlx(e, &statement, &[]))?;
        }
        Ok(())
    }
}

async fn run(conn: &mut AnyConnection, statement: &str) -> Result<(), EvolveError> {
    sqlx::query(statement)
        .execute(&mut *conn)
        .await
        .map_err(|e| EvolveError::from_sqlx(e, statement, &[]))?;
    Ok(())
}
