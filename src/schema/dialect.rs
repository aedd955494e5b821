use serde::{Deserialize, Serialize};
use sqlx::AnyConnection;
use std::fmt;

use super::column::{ColumnSpec, ColumnType};
use super::error::SchemaError;

/// SQL dialect behind an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Detect the dialect of a connection opened through the `Any` driver.
    pub fn of(conn: &AnyConnection) -> Result<Self, SchemaError> {
        let backend = conn.backend_name();
        Self::from_backend_name(backend)
            .ok_or_else(|| SchemaError::UnsupportedBackend(backend.to_string()))
    }

    pub fn from_backend_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// DDL participates in transactions and can be rolled back.
    pub fn transactional_ddl(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS` is understood natively.
    pub fn supports_add_column_if_not_exists(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Positional bind placeholder for parameter `index` (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Catalog query returning `column_name`, `data_type` and `is_nullable`
    /// (`YES`/`NO`) as text for the table bound to the first parameter.
    pub(crate) fn columns_query(self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT column_name::text AS column_name,
                        data_type::text AS data_type,
                        is_nullable::text AS is_nullable
                 FROM information_schema.columns
                 WHERE table_schema = current_schema() AND table_name = lower($1)
                 ORDER BY ordinal_position"
            }
            Dialect::MySql => {
                "SELECT CAST(column_name AS CHAR) AS column_name,
                        CAST(data_type AS CHAR) AS data_type,
                        CAST(is_nullable AS CHAR) AS is_nullable
                 FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = ?
                 ORDER BY ordinal_position"
            }
            Dialect::Sqlite => {
                "SELECT name AS column_name,
                        type AS data_type,
                        CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable
                 FROM pragma_table_info(?)
                 ORDER BY cid"
            }
        }
    }

    /// Only Postgres lets a table exist with zero columns, so only there can
    /// an empty column list hide an existing table.
    pub(crate) fn allows_columnless_tables(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Existence check for the table bound to the first parameter.
    pub(crate) fn table_query(self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT table_name::text AS table_name
                 FROM information_schema.tables
                 WHERE table_schema = current_schema() AND table_name = lower($1)"
            }
            Dialect::MySql => {
                "SELECT CAST(table_name AS CHAR) AS table_name
                 FROM information_schema.tables
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
            Dialect::Sqlite => {
                "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
        }
    }

    pub fn add_column(self, table: &str, column: &ColumnSpec, if_not_exists: bool) -> String {
        let guard = if if_not_exists && self.supports_add_column_if_not_exists() {
            "IF NOT EXISTS "
        } else {
            ""
        };
        format!(
            "ALTER TABLE {} ADD COLUMN {}{}",
            table,
            guard,
            column.definition(self)
        )
    }

    pub fn drop_column(self, table: &str, column: &str) -> String {
        match self {
            Dialect::Postgres => format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, column),
            Dialect::MySql | Dialect::Sqlite => {
                format!("ALTER TABLE {} DROP COLUMN {}", table, column)
            }
        }
    }

    pub fn set_nullable(
        self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Result<String, SchemaError> {
        match self {
            Dialect::Postgres => Ok(format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                table,
                column,
                if nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
            )),
            Dialect::MySql => Ok(format!(
                "ALTER TABLE {} MODIFY {} {} {}",
                table,
                column,
                column_type.ddl(self),
                if nullable { "NULL" } else { "NOT NULL" }
            )),
            Dialect::Sqlite => Err(SchemaError::Unsupported {
                dialect: self,
                operation: "changing column nullability",
            }),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "PostgreSQL"),
            Dialect::MySql => write!(f, "MySQL"),
            Dialect::Sqlite => write!(f, "SQLite"),
        }
    }
}
