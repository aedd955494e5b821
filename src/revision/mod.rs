//! Versioned revisions for changes that are not purely additive, such as
//! relaxing a column's NOT NULL constraint.
//!
//! Revisions form a single line from a base to a head. Each one names its
//! predecessor and carries the changes to apply on upgrade and the changes
//! that undo them on downgrade. The applied head is kept in a one-row
//! version table.

pub mod chain;
pub mod store;

use serde::Serialize;
use sqlx::{AnyConnection, Connection};
use tracing::info;

pub use chain::RevisionChain;
pub use store::VersionTable;

use crate::db;
use crate::schema::column::check_identifier;
use crate::schema::evolve::{apply_target, execute, resolve_strategy};
use crate::schema::{observe, ColumnType, Dialect, EvolveError, SchemaError, Strategy, TargetSchema};

#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("revision `{0}` is defined more than once")]
    Duplicate(String),
    #[error("revision chain has no base revision")]
    NoBase,
    #[error("revision chain has several base revisions: {}", .0.join(", "))]
    MultipleBases(Vec<String>),
    #[error("revision `{revision}` points at unknown predecessor `{predecessor}`")]
    MissingPredecessor { revision: String, predecessor: String },
    #[error("revision `{parent}` has more than one successor: {}", .children.join(", "))]
    Branch { parent: String, children: Vec<String> },
    #[error("revisions {} are not reachable from the base", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("unknown revision `{0}`")]
    UnknownRevision(String),
    #[error("cannot {direction} from `{from}` to `{to}`")]
    WrongDirection {
        direction: &'static str,
        from: String,
        to: String,
    },
    #[error(transparent)]
    Evolve(#[from] EvolveError),
}

impl From<SchemaError> for RevisionError {
    fn from(err: SchemaError) -> Self {
        RevisionError::Evolve(err.into())
    }
}

/// One schema change inside a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Add missing columns; already present columns are left alone.
    AddColumns(TargetSchema),
    /// Drop a column if it is there.
    DropColumn { table: String, column: String },
    /// Allow or forbid NULLs in an existing column. `column_type` is needed by
    /// dialects that restate the full column definition.
    SetNullable {
        table: String,
        column: String,
        column_type: ColumnType,
        nullable: bool,
    },
}

impl Change {
    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Change::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn set_nullable(
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
        nullable: bool,
    ) -> Self {
        Change::SetNullable {
            table: table.into(),
            column: column.into(),
            column_type,
            nullable,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Change::AddColumns(target) => format!(
                "add {} to {}",
                target
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                target.table
            ),
            Change::DropColumn { table, column } => format!("drop {}.{}", table, column),
            Change::SetNullable {
                table,
                column,
                nullable,
                ..
            } => format!(
                "make {}.{} {}",
                table,
                column,
                if *nullable { "nullable" } else { "NOT NULL" }
            ),
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Change::AddColumns(target) => target.validate(),
            Change::DropColumn { table, column } | Change::SetNullable { table, column, .. } => {
                check_identifier(table)?;
                check_identifier(column)
            }
        }
    }

    /// Apply this change, returning the statements it issued. `applied` holds
    /// statements issued earlier in the same step.
    async fn apply(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        strategy: Strategy,
        applied: &[String],
    ) -> Result<Vec<String>, EvolveError> {
        match self {
            Change::AddColumns(target) => {
                let strategy = resolve_strategy(dialect, strategy);
                let result =
                    apply_target(conn, dialect, target, strategy, false, applied).await?;
                Ok(result.statements)
            }
            Change::DropColumn { table, column } => {
                if dialect != Dialect::Postgres {
                    let observed = observe(conn, dialect, table).await?;
                    if !observed.exists() {
                        return Err(SchemaError::TableNotFound(table.clone()).into());
                    }
                    if !observed.contains(column) {
                        info!("Column {}.{} already absent, skipping", table, column);
                        return Ok(Vec::new());
                    }
                }
                let statement = dialect.drop_column(table, column);
                execute(conn, dialect, &statement, applied).await?;
                info!("🗑️ Dropped column {}.{}", table, column);
                Ok(vec![statement])
            }
            Change::SetNullable {
                table,
                column,
                column_type,
                nullable,
            } => {
                let statement = dialect.set_nullable(table, column, *column_type, *nullable)?;
                execute(conn, dialect, &statement, applied).await?;
                info!("✅ {}", self.describe());
                Ok(vec![statement])
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub id: String,
    pub down_revision: Option<String>,
    pub description: String,
    pub upgrade: Vec<Change>,
    pub downgrade: Vec<Change>,
}

impl Revision {
    pub fn new(
        id: impl Into<String>,
        down_revision: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            down_revision: down_revision.map(str::to_string),
            description: description.into(),
            upgrade: Vec::new(),
            downgrade: Vec::new(),
        }
    }

    pub fn on_upgrade(mut self, change: Change) -> Self {
        self.upgrade.push(change);
        self
    }

    pub fn on_downgrade(mut self, change: Change) -> Self {
        self.downgrade.push(change);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub down_revision: Option<String>,
    pub description: String,
    pub applied: bool,
    pub current: bool,
}

/// Moves a database along a [`RevisionChain`].
#[derive(Debug, Clone)]
pub struct Migrator<'a> {
    chain: &'a RevisionChain,
    version_table: String,
    strategy: Strategy,
}

impl<'a> Migrator<'a> {
    pub fn new(chain: &'a RevisionChain) -> Self {
        Self {
            chain,
            version_table: "schema_revision".to_string(),
            strategy: Strategy::Introspect,
        }
    }

    pub fn with_version_table(mut self, name: impl Into<String>) -> Self {
        self.version_table = name.into();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn chain(&self) -> &RevisionChain {
        self.chain
    }

    /// Applied head, or `None` if nothing has been applied yet.
    pub async fn current(&self, conn: &mut AnyConnection) -> Result<Option<String>, RevisionError> {
        let dialect = Dialect::of(conn)?;
        check_identifier(&self.version_table)?;

        let observed = observe(conn, dialect, &self.version_table).await?;
        if !observed.exists() {
            return Ok(None);
        }
        let current = VersionTable::new(&self.version_table, dialect)
            .current(conn)
            .await?;
        Ok(current)
    }

    pub async fn history(&self, conn: &mut AnyConnection) -> Result<Vec<HistoryEntry>, RevisionError> {
        let current = self.current(conn).await?;
        let head = match current.as_deref() {
            Some(id) => Some(self.require(id)?),
            None => None,
        };

        Ok(self
            .chain
            .revisions()
            .iter()
            .enumerate()
            .map(|(index, revision)| HistoryEntry {
                id: revision.id.clone(),
                down_revision: revision.down_revision.clone(),
                description: revision.description.clone(),
                applied: head.map_or(false, |head| index <= head),
                current: head == Some(index),
            })
            .collect())
    }

    /// Apply every revision after the current head up to and including
    /// `target` (the chain head when `None`). Returns the ids applied.
    pub async fn upgrade(
        &self,
        conn: &mut AnyConnection,
        target: Option<&str>,
    ) -> Result<Vec<String>, RevisionError> {
        let dialect = Dialect::of(conn)?;
        let table = self.prepare(conn, dialect).await?;
        let current = table.current(conn).await?;

        let start = match current.as_deref() {
            Some(id) => self.require(id)? + 1,
            None => 0,
        };
        let end = match target {
            Some(id) => self.require(id)? + 1,
            None => self.chain.len(),
        };
        if end < start {
            return Err(RevisionError::WrongDirection {
                direction: "upgrade",
                from: current.unwrap_or_else(|| "base".to_string()),
                to: target.unwrap_or("head").to_string(),
            });
        }

        let pending = &self.chain.revisions()[start..end];
        for change in pending.iter().flat_map(|r| r.upgrade.iter()) {
            change.validate()?;
        }

        let mut applied = Vec::with_capacity(pending.len());
        for revision in pending {
            info!("⬆️ Upgrading to {}: {}", revision.id, revision.description);
            self.step(conn, dialect, &table, &revision.upgrade, Some(&revision.id))
                .await?;
            applied.push(revision.id.clone());
        }

        if applied.is_empty() {
            info!("Already at {}", current.as_deref().unwrap_or("base"));
        }
        Ok(applied)
    }

    /// Undo revisions from the current head back to `target`, which stays
    /// applied. `None` undoes everything. Returns the ids reverted, newest
    /// first.
    pub async fn downgrade(
        &self,
        conn: &mut AnyConnection,
        target: Option<&str>,
    ) -> Result<Vec<String>, RevisionError> {
        let dialect = Dialect::of(conn)?;
        let table = self.prepare(conn, dialect).await?;
        let current = table.current(conn).await?;

        let applied_count = match current.as_deref() {
            Some(id) => self.require(id)? + 1,
            None => 0,
        };
        let keep = match target {
            Some(id) => self.require(id)? + 1,
            None => 0,
        };
        if keep > applied_count {
            return Err(RevisionError::WrongDirection {
                direction: "downgrade",
                from: current.unwrap_or_else(|| "base".to_string()),
                to: target.unwrap_or("base").to_string(),
            });
        }

        let undo = &self.chain.revisions()[keep..applied_count];
        for change in undo.iter().flat_map(|r| r.downgrade.iter()) {
            change.validate()?;
        }

        let mut reverted = Vec::with_capacity(undo.len());
        for revision in undo.iter().rev() {
            info!("⬇️ Downgrading {}: {}", revision.id, revision.description);
            self.step(
                conn,
                dialect,
                &table,
                &revision.downgrade,
                revision.down_revision.as_deref(),
            )
            .await?;
            reverted.push(revision.id.clone());
        }
        Ok(reverted)
    }

    fn require(&self, id: &str) -> Result<usize, RevisionError> {
        self.chain
            .position(id)
            .ok_or_else(|| RevisionError::UnknownRevision(id.to_string()))
    }

    async fn prepare(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
    ) -> Result<VersionTable, RevisionError> {
        check_identifier(&self.version_table)?;
        let table = VersionTable::new(&self.version_table, dialect);
        table.ensure(conn).await?;
        Ok(table)
    }

    /// Apply one revision's changes and move the head, as one transaction
    /// where the dialect allows it.
    async fn step(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        table: &VersionTable,
        changes: &[Change],
        new_head: Option<&str>,
    ) -> Result<(), RevisionError> {
        if !dialect.transactional_ddl() {
            return self.apply_changes(conn, dialect, table, changes, new_head).await;
        }

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| EvolveError::from_sqlx(e, "BEGIN", &[]))?;
        let outcome = self
            .apply_changes(&mut *tx, dialect, table, changes, new_head)
            .await;
        db::finish(tx, outcome).await
    }

    async fn apply_changes(
        &self,
        conn: &mut AnyConnection,
        dialect: Dialect,
        table: &VersionTable,
        changes: &[Change],
        new_head: Option<&str>,
    ) -> Result<(), RevisionError> {
        let mut applied = Vec::new();
        for change in changes {
            let statements = change.apply(conn, dialect, self.strategy, &applied).await?;
            applied.extend(statements);
        }
        table.set(conn, new_head).await?;
        Ok(())
    }
}
