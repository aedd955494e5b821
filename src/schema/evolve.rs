use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, Connection};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use super::column::{check_identifier, ColumnSpec};
use super::dialect::Dialect;
use super::error::{EvolveError, SchemaError};
use super::introspect::{observe, ObservedSchema};
use crate::db;

/// Columns a caller wants present on one existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TargetSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Load a target from a JSON file of the form
    /// `{ "table": "users", "columns": [{ "name": ..., "type": ... }] }`.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target file {}", path.display()))?;
        let target = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse target file {}", path.display()))?;
        Ok(target)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        check_identifier(&self.table)?;
        if self.columns.is_empty() {
            return Err(SchemaError::EmptyTarget(self.table.clone()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            column.check()?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(())
    }
}

/// How the procedure decides which columns are missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Read the catalog and only add what is absent.
    #[default]
    Introspect,
    /// Read the catalog, then issue `ADD COLUMN IF NOT EXISTS` for the
    /// missing columns. Postgres only.
    Native,
}

impl Strategy {
    /// Outcome recorded for a column this strategy has just issued DDL for.
    pub fn applied_outcome(self) -> ColumnOutcome {
        match self {
            Strategy::Introspect => ColumnOutcome::Added,
            Strategy::Native => ColumnOutcome::Ensured,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvolveOptions {
    pub strategy: Strategy,
    /// Compute and report the statements without issuing any DDL.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOutcome {
    Added,
    AlreadyPresent,
    /// Absent when the catalog was read, then issued with `IF NOT EXISTS`.
    Ensured,
    /// Dry run: would be added.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnReport {
    pub column: String,
    pub outcome: ColumnOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvolutionResult {
    pub table: String,
    pub dialect: Dialect,
    pub dry_run: bool,
    pub columns: Vec<ColumnReport>,
    pub statements: Vec<String>,
}

impl EvolutionResult {
    fn new(table: &str, dialect: Dialect, dry_run: bool) -> Self {
        Self {
            table: table.to_string(),
            dialect,
            dry_run,
            columns: Vec::new(),
            statements: Vec::new(),
        }
    }

    fn record(&mut self, column: &str, outcome: ColumnOutcome) {
        self.columns.push(ColumnReport {
            column: column.to_string(),
            outcome,
        });
    }

    fn with_outcome(&self, outcome: ColumnOutcome) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|report| report.outcome == outcome)
            .map(|report| report.column.as_str())
            .collect()
    }

    pub fn added(&self) -> Vec<&str> {
        self.with_outcome(ColumnOutcome::Added)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_outcome(ColumnOutcome::AlreadyPresent)
    }

    pub fn planned(&self) -> Vec<&str> {
        self.with_outcome(ColumnOutcome::Planned)
    }

    /// Nothing was (or would be) changed.
    pub fn is_noop(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Target columns split by whether the table already has them.
#[derive(Debug)]
pub struct Delta<'a> {
    pub missing: Vec<&'a ColumnSpec>,
    pub present: Vec<&'a ColumnSpec>,
}

impl<'a> Delta<'a> {
    /// Fails if the table does not exist or if a present column has a type
    /// incompatible with the target, before anything is issued.
    pub fn compute(target: &'a TargetSchema, observed: &ObservedSchema) -> Result<Self, SchemaError> {
        if !observed.exists() {
            return Err(SchemaError::TableNotFound(target.table.clone()));
        }

        let mut delta = Delta {
            missing: Vec::new(),
            present: Vec::new(),
        };
        for spec in &target.columns {
            match observed.get(&spec.name) {
                Some(existing) if !spec.column_type.accepts(&existing.data_type) => {
                    return Err(SchemaError::TypeConflict {
                        table: target.table.clone(),
                        column: spec.name.clone(),
                        observed: existing.data_type.clone(),
                        target: spec.column_type,
                    });
                }
                Some(_) => delta.present.push(spec),
                None => delta.missing.push(spec),
            }
        }
        Ok(delta)
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Bring `target.table` up to `target.columns` by adding whatever is missing.
///
/// Safe to re-run: a second call with the same target adds nothing. On
/// dialects with transactional DDL the whole call is one transaction and a
/// failure leaves the table as it was. On MySQL each statement commits on its
/// own, and a failure reports what was already applied in
/// [`SchemaError::Rejected`].
pub async fn evolve(
    conn: &mut AnyConnection,
    target: &TargetSchema,
    options: EvolveOptions,
) -> Result<EvolutionResult, EvolveError> {
    target.validate()?;
    let dialect = Dialect::of(conn)?;
    let strategy = resolve_strategy(dialect, options.strategy);

    if options.dry_run || !dialect.transactional_ddl() {
        return apply_target(conn, dialect, target, strategy, options.dry_run, &[]).await;
    }

    let mut tx = conn
        .begin()
        .await
        .map_err(|e| EvolveError::from_sqlx(e, "BEGIN", &[]))?;
    let outcome = apply_target(&mut *tx, dialect, target, strategy, false, &[]).await;
    db::finish(tx, outcome).await
}

/// Report what [`evolve`] would do without changing anything.
pub async fn plan(
    conn: &mut AnyConnection,
    target: &TargetSchema,
) -> Result<EvolutionResult, EvolveError> {
    evolve(
        conn,
        target,
        EvolveOptions {
            strategy: Strategy::Introspect,
            dry_run: true,
        },
    )
    .await
}

pub(crate) fn resolve_strategy(dialect: Dialect, requested: Strategy) -> Strategy {
    match requested {
        Strategy::Native if !dialect.supports_add_column_if_not_exists() => {
            warn!(
                "{} has no ADD COLUMN IF NOT EXISTS, falling back to catalog introspection",
                dialect
            );
            Strategy::Introspect
        }
        strategy => strategy,
    }
}

/// Evolution body without transaction handling; the caller owns the
/// transaction, if any. `applied` holds statements issued earlier in the same
/// unit of work, reported alongside this call's own if a statement fails.
///
/// Both strategies read the catalog first; a missing table or a type conflict
/// fails before any DDL. The native strategy also guards each statement with
/// `IF NOT EXISTS`.
pub(crate) async fn apply_target(
    conn: &mut AnyConnection,
    dialect: Dialect,
    target: &TargetSchema,
    strategy: Strategy,
    dry_run: bool,
    applied: &[String],
) -> Result<EvolutionResult, EvolveError> {
    let table = target.table.as_str();
    let mut result = EvolutionResult::new(table, dialect, dry_run);

    let observed = observe(conn, dialect, table).await?;
    let delta = Delta::compute(target, &observed)?;
    let guarded = strategy == Strategy::Native;

    for spec in &target.columns {
        if delta.present.iter().any(|present| present.name == spec.name) {
            info!("Column {}.{} already present, skipping", table, spec.name);
            result.record(&spec.name, ColumnOutcome::AlreadyPresent);
            continue;
        }

        let statement = dialect.add_column(table, spec, guarded);
        if dry_run {
            info!("Would run: {}", statement);
            result.record(&spec.name, ColumnOutcome::Planned);
        } else {
            let before: Vec<String> =
                applied.iter().chain(&result.statements).cloned().collect();
            execute(conn, dialect, &statement, &before).await?;
            let outcome = strategy.applied_outcome();
            if outcome == ColumnOutcome::Ensured {
                info!("✅ Ensured column {}.{}", table, spec.name);
            } else {
                info!("✅ Added column {}.{}", table, spec.name);
            }
            result.record(&spec.name, outcome);
        }
        result.statements.push(statement);
    }

    Ok(result)
}

/// Run one DDL statement. `applied` lists the statements that went through
/// before it in the same run.
pub(crate) async fn execute(
    conn: &mut AnyConnection,
    dialect: Dialect,
    statement: &str,
    applied: &[String],
) -> Result<(), EvolveError> {
    match sqlx::query(statement).execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(e) => {
            if !dialect.transactional_ddl() && !applied.is_empty() {
                warn!(
                    "{} committed {} statement(s) before `{}` failed; they stay applied",
                    dialect,
                    applied.len(),
                    statement
                );
            }
            // Committed statements are only reported where they cannot have
            // been rolled back.
            let committed: &[String] = if dialect.transactional_ddl() { &[] } else { applied };
            Err(EvolveError::from_sqlx(e, statement, committed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::{ColumnType, DefaultValue};
    use crate::schema::introspect::ObservedColumn;

    fn observed(columns: &[(&str, &str)]) -> ObservedSchema {
        ObservedSchema::new(
            "users",
            columns
                .iter()
                .map(|(name, data_type)| ObservedColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    nullable: true,
                })
                .collect(),
        )
    }

    fn auth_target() -> TargetSchema {
        TargetSchema::new("users")
            .column(ColumnSpec::new("password_hash", ColumnType::Varchar(None)))
            .column(
                ColumnSpec::new("is_active", ColumnType::Boolean)
                    .with_default(DefaultValue::Bool(true)),
            )
    }

    #[test]
    fn test_delta_lists_only_missing_columns() {
        let target = auth_target();
        let observed = observed(&[("id", "integer"), ("email", "character varying"), ("is_active", "boolean")]);

        let delta = Delta::compute(&target, &observed).unwrap();
        assert_eq!(
            delta.missing.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["password_hash"]
        );
        assert_eq!(
            delta.present.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["is_active"]
        );
    }

    #[test]
    fn test_delta_empty_when_everything_present() {
        let target = auth_target();
        let observed = observed(&[("id", "integer"), ("password_hash", "VARCHAR"), ("is_active", "BOOLEAN")]);
        assert!(Delta::compute(&target, &observed).unwrap().is_empty());
    }

    #[test]
    fn test_delta_rejects_type_conflict() {
        let target = auth_target();
        let observed = observed(&[("id", "integer"), ("is_active", "character varying")]);

        match Delta::compute(&target, &observed) {
            Err(SchemaError::TypeConflict { column, observed, .. }) => {
                assert_eq!(column, "is_active");
                assert_eq!(observed, "character varying");
            }
            other => panic!("expected type conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_reports_missing_table() {
        let target = auth_target();
        assert!(matches!(
            Delta::compute(&target, &observed(&[])),
            Err(SchemaError::TableNotFound(table)) if table == "users"
        ));
    }

    #[test]
    fn test_delta_on_columnless_table() {
        let target = auth_target();
        let delta = Delta::compute(&target, &ObservedSchema::without_columns("users")).unwrap();
        assert_eq!(delta.missing.len(), 2);
        assert!(delta.present.is_empty());
    }

    #[test]
    fn test_applied_outcome_per_strategy() {
        assert_eq!(Strategy::Introspect.applied_outcome(), ColumnOutcome::Added);
        assert_eq!(Strategy::Native.applied_outcome(), ColumnOutcome::Ensured);
    }

    #[test]
    fn test_target_validation() {
        assert!(auth_target().validate().is_ok());

        assert!(matches!(
            TargetSchema::new("users").validate(),
            Err(SchemaError::EmptyTarget(_))
        ));
        assert!(matches!(
            TargetSchema::new("users; drop")
                .column(ColumnSpec::new("a", ColumnType::Text))
                .validate(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            TargetSchema::new("users")
                .column(ColumnSpec::new("a", ColumnType::Text))
                .column(ColumnSpec::new("A", ColumnType::Integer))
                .validate(),
            Err(SchemaError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_target_from_json() {
        let target: TargetSchema = serde_json::from_str(
            r#"{
                "table": "users",
                "columns": [
                    { "name": "password_hash", "type": "varchar" },
                    { "name": "is_active", "type": "boolean", "default": true }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(target, auth_target());
    }
}
