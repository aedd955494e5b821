use serde::Serialize;
use sqlx::{AnyConnection, Row};
use tracing::debug;

use super::dialect::Dialect;
use super::error::EvolveError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedColumn {
    pub name: String,
    /// Type name as the catalog reports it, e.g. `character varying`.
    pub data_type: String,
    pub nullable: bool,
}

/// Columns a table has right now, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservedSchema {
    pub table: String,
    exists: bool,
    columns: Vec<ObservedColumn>,
}

impl ObservedSchema {
    /// A table that exists if it has at least one column.
    pub fn new(table: impl Into<String>, columns: Vec<ObservedColumn>) -> Self {
        Self {
            table: table.into(),
            exists: !columns.is_empty(),
            columns,
        }
    }

    /// An existing table with no columns (`CREATE TABLE t()` on Postgres).
    pub fn without_columns(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            exists: true,
            columns: Vec::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Unquoted identifiers are case-insensitive, so lookups are too.
    pub fn get(&self, name: &str) -> Option<&ObservedColumn> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn columns(&self) -> &[ObservedColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// No columns. Check [`ObservedSchema::exists`] to tell a missing table
    /// from a column-less one.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Read the current column set of `table` from the system catalog.
pub async fn observe(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<ObservedSchema, EvolveError> {
    let query = dialect.columns_query();
    let rows = sqlx::query(query)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EvolveError::from_sqlx(e, query, &[]))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row
            .try_get("column_name")
            .map_err(|e| EvolveError::from_sqlx(e, query, &[]))?;
        let data_type: String = row
            .try_get("data_type")
            .map_err(|e| EvolveError::from_sqlx(e, query, &[]))?;
        let is_nullable: String = row
            .try_get("is_nullable")
            .map_err(|e| EvolveError::from_sqlx(e, query, &[]))?;

        columns.push(ObservedColumn {
            name,
            data_type,
            nullable: is_nullable.eq_ignore_ascii_case("YES"),
        });
    }

    if columns.is_empty()
        && dialect.allows_columnless_tables()
        && table_exists(conn, dialect, table).await?
    {
        debug!("Table {} exists without columns", table);
        return Ok(ObservedSchema::without_columns(table));
    }

    debug!(
        "Observed {} column(s) on {}: {:?}",
        columns.len(),
        table,
        columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
    );

    Ok(ObservedSchema::new(table, columns))
}

async fn table_exists(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<bool, EvolveError> {
    let query = dialect.table_query();
    let row = sqlx::query(query)
        .bind(table)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| EvolveError::from_sqlx(e, query, &[]))?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> ObservedSchema {
        ObservedSchema::new(
            "users",
            vec![
                ObservedColumn {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                },
                ObservedColumn {
                    name: "email".to_string(),
                    data_type: "character varying".to_string(),
                    nullable: false,
                },
            ],
        )
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let observed = users();
        assert!(observed.contains("email"));
        assert!(observed.contains("EMAIL"));
        assert!(!observed.contains("password_hash"));
        assert_eq!(observed.column_names(), vec!["id", "email"]);
    }

    #[test]
    fn test_empty_means_missing_table() {
        let missing = ObservedSchema::new("nope", Vec::new());
        assert!(missing.is_empty());
        assert!(!missing.exists());
        assert!(users().exists());
    }

    #[test]
    fn test_columnless_table_exists() {
        let bare = ObservedSchema::without_columns("audit");
        assert!(bare.is_empty());
        assert!(bare.exists());
    }
}
