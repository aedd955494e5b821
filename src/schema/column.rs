use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::dialect::Dialect;
use super::error::SchemaError;

/// Scalar column types a target schema can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Integer,
    BigInt,
    Boolean,
    Text,
    Varchar(Option<u32>),
    Double,
    Timestamp,
    Json,
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseColumnError(String);

impl ColumnType {
    /// DDL spelling of this type for `dialect`.
    pub fn ddl(&self, dialect: Dialect) -> String {
        use ColumnType::*;
        use Dialect::*;

        match (self, dialect) {
            (Integer, _) => "INTEGER".to_string(),
            (BigInt, _) => "BIGINT".to_string(),
            (Boolean, _) => "BOOLEAN".to_string(),
            (Text, _) => "TEXT".to_string(),
            (Varchar(Some(len)), _) => format!("VARCHAR({})", len),
            // MySQL refuses VARCHAR without a length
            (Varchar(None), MySql) => "VARCHAR(255)".to_string(),
            (Varchar(None), _) => "VARCHAR".to_string(),
            (Double, Postgres) => "DOUBLE PRECISION".to_string(),
            (Double, MySql) => "DOUBLE".to_string(),
            (Double, Sqlite) => "REAL".to_string(),
            (Timestamp, Postgres) => "TIMESTAMPTZ".to_string(),
            (Timestamp, _) => "DATETIME".to_string(),
            (Json, Postgres) => "JSONB".to_string(),
            (Json, MySql) => "JSON".to_string(),
            (Json, Sqlite) => "TEXT".to_string(),
            (Uuid, Postgres) => "UUID".to_string(),
            (Uuid, MySql) => "CHAR(36)".to_string(),
            (Uuid, Sqlite) => "TEXT".to_string(),
        }
    }

    /// Whether a column reported by the catalog as `catalog_type` already
    /// satisfies this type. Unknown catalog types never match; an empty one
    /// (a SQLite column declared without a type) matches everything.
    pub fn accepts(&self, catalog_type: &str) -> bool {
        let observed = normalize_type_name(catalog_type);
        if observed.is_empty() {
            return true;
        }
        self.catalog_names().iter().any(|name| *name == observed)
    }

    fn catalog_names(&self) -> &'static [&'static str] {
        match self {
            ColumnType::Integer => &["integer", "int", "int4", "smallint", "int2", "mediumint"],
            ColumnType::BigInt => &["bigint", "int8"],
            // MySQL reports BOOLEAN columns as tinyint
            ColumnType::Boolean => &["boolean", "bool", "tinyint"],
            ColumnType::Text | ColumnType::Varchar(_) => &[
                "text",
                "character varying",
                "varchar",
                "character",
                "char",
                "mediumtext",
                "longtext",
            ],
            ColumnType::Double => &[
                "double precision",
                "double",
                "real",
                "float",
                "float4",
                "float8",
                "numeric",
                "decimal",
            ],
            ColumnType::Timestamp => &[
                "timestamp with time zone",
                "timestamp without time zone",
                "timestamptz",
                "timestamp",
                "datetime",
            ],
            ColumnType::Json => &["jsonb", "json", "text"],
            ColumnType::Uuid => &["uuid", "char", "character", "text", "varchar", "character varying"],
        }
    }
}

/// Lowercase, drop any `(...)` modifiers and collapse whitespace, so that
/// `VARCHAR(255)` and `timestamp(6) with time zone` compare by family.
fn normalize_type_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch.to_ascii_lowercase()),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Varchar(Some(len)) => write!(f, "varchar({})", len),
            ColumnType::Varchar(None) => write!(f, "varchar"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Json => write!(f, "json"),
            ColumnType::Uuid => write!(f, "uuid"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = normalize_spaces(&s.to_ascii_lowercase());

        if let Some(len) = lowered
            .strip_prefix("varchar(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let len = len
                .trim()
                .parse::<u32>()
                .map_err(|_| ParseColumnError(format!("invalid varchar length in `{}`", s)))?;
            return Ok(ColumnType::Varchar(Some(len)));
        }

        let column_type = match lowered.as_str() {
            "int" | "integer" | "int4" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "bool" | "boolean" => ColumnType::Boolean,
            "text" | "string" => ColumnType::Text,
            "varchar" | "character varying" => ColumnType::Varchar(None),
            "double" | "double precision" | "float" | "float8" => ColumnType::Double,
            "timestamp" | "timestamptz" | "datetime" => ColumnType::Timestamp,
            "json" | "jsonb" => ColumnType::Json,
            "uuid" => ColumnType::Uuid,
            _ => return Err(ParseColumnError(format!("unknown column type `{}`", s))),
        };
        Ok(column_type)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = ParseColumnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Default applied to a newly added column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    /// Quoted as a string literal when rendered.
    Text(String),
    /// Raw SQL expression such as `CURRENT_TIMESTAMP`.
    Expr { expr: String },
}

impl DefaultValue {
    pub fn expr(expr: impl Into<String>) -> Self {
        DefaultValue::Expr { expr: expr.into() }
    }

    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Bool(true) => "true".to_string(),
            DefaultValue::Bool(false) => "false".to_string(),
            DefaultValue::Int(value) => value.to_string(),
            DefaultValue::Text(text) => format!("'{}'", text.replace('\'', "''")),
            DefaultValue::Expr { expr } => expr.clone(),
        }
    }

    fn check(&self, column: &str) -> Result<(), SchemaError> {
        if let DefaultValue::Expr { expr } = self {
            if expr.trim().is_empty() {
                return Err(SchemaError::InvalidDefault {
                    column: column.to_string(),
                    reason: "expression is empty",
                });
            }
            if expr.contains(';') {
                return Err(SchemaError::InvalidDefault {
                    column: column.to_string(),
                    reason: "expression must be a single SQL expression",
                });
            }
        }
        Ok(())
    }
}

impl FromStr for DefaultValue {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ParseColumnError("empty default".to_string()));
        }
        if raw.eq_ignore_ascii_case("true") {
            return Ok(DefaultValue::Bool(true));
        }
        if raw.eq_ignore_ascii_case("false") {
            return Ok(DefaultValue::Bool(false));
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(DefaultValue::Int(value));
        }
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            let inner = &raw[1..raw.len() - 1];
            return Ok(DefaultValue::Text(inner.replace("''", "'")));
        }
        Ok(DefaultValue::expr(raw))
    }
}

/// One entry of a target schema descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// Nullable column without a default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// `<name> <TYPE> [NOT NULL] [DEFAULT <value>]`
    pub fn definition(&self, dialect: Dialect) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.ddl(dialect));
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql());
        }
        sql
    }

    pub(crate) fn check(&self) -> Result<(), SchemaError> {
        check_identifier(&self.name)?;
        if let Some(default) = &self.default {
            default.check(&self.name)?;
        }
        Ok(())
    }
}

/// Parses `name:type[:null|:not-null][=default]`, e.g.
/// `is_active:boolean:not-null=true` or `bio:text='n/a'`.
impl FromStr for ColumnSpec {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, default) = match s.split_once('=') {
            Some((head, default)) => (head, Some(default.parse::<DefaultValue>()?)),
            None => (s, None),
        };

        let mut parts = head.split(':').map(str::trim);
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ParseColumnError(format!("missing column name in `{}`", s)))?;
        let column_type = parts
            .next()
            .ok_or_else(|| ParseColumnError(format!("missing column type in `{}`", s)))?
            .parse::<ColumnType>()?;
        let nullable = match parts.next() {
            None | Some("null") | Some("nullable") => true,
            Some("not-null") | Some("notnull") => false,
            Some(other) => {
                return Err(ParseColumnError(format!(
                    "unknown nullability `{}` in `{}`",
                    other, s
                )))
            }
        };
        if parts.next().is_some() {
            return Err(ParseColumnError(format!("too many `:` sections in `{}`", s)));
        }

        Ok(ColumnSpec {
            name: name.to_string(),
            column_type,
            nullable,
            default,
        })
    }
}

pub fn is_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_identifier(ident: &str) -> Result<(), SchemaError> {
    if is_identifier(ident) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [ColumnType; 10] = [
        ColumnType::Integer,
        ColumnType::BigInt,
        ColumnType::Boolean,
        ColumnType::Text,
        ColumnType::Varchar(None),
        ColumnType::Varchar(Some(64)),
        ColumnType::Double,
        ColumnType::Timestamp,
        ColumnType::Json,
        ColumnType::Uuid,
    ];

    #[test]
    fn test_every_type_accepts_its_own_ddl() {
        // A second run must see what the first run created as compatible.
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            for column_type in ALL_TYPES {
                let ddl = column_type.ddl(dialect);
                assert!(
                    column_type.accepts(&ddl),
                    "{} does not accept {} on {}",
                    column_type,
                    ddl,
                    dialect
                );
            }
        }
    }

    #[test]
    fn test_accepts_postgres_catalog_names() {
        assert!(ColumnType::Varchar(None).accepts("character varying"));
        assert!(ColumnType::Boolean.accepts("boolean"));
        assert!(ColumnType::Timestamp.accepts("timestamp(6) with time zone"));
        assert!(ColumnType::Double.accepts("double precision"));
        assert!(!ColumnType::Boolean.accepts("character varying"));
        assert!(!ColumnType::Integer.accepts("text"));
        assert!(!ColumnType::Text.accepts("geometry"));
    }

    #[test]
    fn test_untyped_sqlite_column_accepts_anything() {
        for column_type in [ColumnType::Text, ColumnType::Integer, ColumnType::Boolean, ColumnType::Json] {
            assert!(column_type.accepts(""));
            assert!(column_type.accepts("  "));
        }
    }

    #[test]
    fn test_parse_column_type() {
        assert_eq!("VARCHAR".parse::<ColumnType>().unwrap(), ColumnType::Varchar(None));
        assert_eq!(
            "varchar(128)".parse::<ColumnType>().unwrap(),
            ColumnType::Varchar(Some(128))
        );
        assert_eq!("Boolean".parse::<ColumnType>().unwrap(), ColumnType::Boolean);
        assert_eq!(
            "double  precision".parse::<ColumnType>().unwrap(),
            ColumnType::Double
        );
        assert!("varchar(abc)".parse::<ColumnType>().is_err());
        assert!("geometry".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_parse_column_spec() {
        let spec: ColumnSpec = "password_hash:varchar".parse().unwrap();
        assert_eq!(spec, ColumnSpec::new("password_hash", ColumnType::Varchar(None)));

        let spec: ColumnSpec = "is_active:boolean:not-null=true".parse().unwrap();
        assert_eq!(spec.column_type, ColumnType::Boolean);
        assert!(!spec.nullable);
        assert_eq!(spec.default, Some(DefaultValue::Bool(true)));

        let spec: ColumnSpec = "bio:text='it''s = fine'".parse().unwrap();
        assert_eq!(spec.default, Some(DefaultValue::Text("it's = fine".to_string())));

        let spec: ColumnSpec = "created_at:timestamp=CURRENT_TIMESTAMP".parse().unwrap();
        assert_eq!(spec.default, Some(DefaultValue::expr("CURRENT_TIMESTAMP")));

        let spec: ColumnSpec = "attempts:integer=3".parse().unwrap();
        assert_eq!(spec.default, Some(DefaultValue::Int(3)));
    }

    #[test]
    fn test_parse_column_spec_errors() {
        assert!("password_hash".parse::<ColumnSpec>().is_err());
        assert!(":text".parse::<ColumnSpec>().is_err());
        assert!("a:text:sometimes".parse::<ColumnSpec>().is_err());
        assert!("a:text:null:extra".parse::<ColumnSpec>().is_err());
    }

    #[test]
    fn test_definition_rendering() {
        let spec = ColumnSpec::new("is_active", ColumnType::Boolean)
            .with_default(DefaultValue::Bool(true));
        assert_eq!(spec.definition(Dialect::Postgres), "is_active BOOLEAN DEFAULT true");

        let spec = ColumnSpec::new("nickname", ColumnType::Varchar(None))
            .not_null()
            .with_default(DefaultValue::Text("o'brien".to_string()));
        assert_eq!(
            spec.definition(Dialect::MySql),
            "nickname VARCHAR(255) NOT NULL DEFAULT 'o''brien'"
        );
    }

    #[test]
    fn test_check_rejects_bad_names_and_defaults() {
        assert!(ColumnSpec::new("drop table", ColumnType::Text).check().is_err());
        assert!(ColumnSpec::new("1col", ColumnType::Text).check().is_err());
        assert!(ColumnSpec::new("_ok_2", ColumnType::Text).check().is_ok());

        let spec = ColumnSpec::new("x", ColumnType::Integer)
            .with_default(DefaultValue::expr("1; DROP TABLE users"));
        assert!(matches!(
            spec.check(),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_spec_deserializes_from_json() {
        let spec: ColumnSpec = serde_json::from_str(
            r#"{ "name": "is_verified", "type": "boolean", "default": false }"#,
        )
        .unwrap();
        assert!(spec.nullable);
        assert_eq!(spec.default, Some(DefaultValue::Bool(false)));

        let spec: ColumnSpec = serde_json::from_str(
            r#"{ "name": "seen_at", "type": "timestamp", "nullable": false, "default": { "expr": "CURRENT_TIMESTAMP" } }"#,
        )
        .unwrap();
        assert!(!spec.nullable);
        assert_eq!(spec.default, Some(DefaultValue::expr("CURRENT_TIMESTAMP")));
    }
}
