//! Canonical target schemas and the revision chain for the platform database.
//!
//! Each logical table has exactly one target here. Older scripts disagreed on
//! the defaults of the auth columns; the values below are the ones every
//! migration now uses.

use crate::revision::{Change, Revision, RevisionChain, RevisionError};
use crate::schema::{ColumnSpec, ColumnType, DefaultValue, TargetSchema};

pub const USERS_TABLE: &str = "users";

/// Revision adding the users auth columns.
pub const USERS_AUTH_REVISION: &str = "3f1c9a0b7d21";
/// Revision relaxing `users.password_hash` to nullable.
pub const NULLABLE_PASSWORD_REVISION: &str = "8e4d2b6c1a90";

/// Auth columns on `users`: `password_hash` (nullable, no default),
/// `is_active` (default true) and `is_verified` (default false).
pub fn users_auth() -> TargetSchema {
    TargetSchema::new(USERS_TABLE)
        .column(ColumnSpec::new("password_hash", ColumnType::Varchar(None)))
        .column(
            ColumnSpec::new("is_active", ColumnType::Boolean)
                .with_default(DefaultValue::Bool(true)),
        )
        .column(
            ColumnSpec::new("is_verified", ColumnType::Boolean)
                .with_default(DefaultValue::Bool(false)),
        )
}

/// Look up a named target, as used by `migrate evolve --preset`.
pub fn preset(name: &str) -> Option<TargetSchema> {
    match name {
        "users-auth" => Some(users_auth()),
        _ => None,
    }
}

pub fn revisions() -> Vec<Revision> {
    let mut add_auth = Revision::new(USERS_AUTH_REVISION, None, "add auth columns to users")
        .on_upgrade(Change::AddColumns(users_auth()));
    for column in users_auth().columns.iter().rev() {
        add_auth = add_auth.on_downgrade(Change::drop_column(USERS_TABLE, &column.name));
    }

    // Accounts created through an external identity provider have no local
    // password.
    let nullable_password = Revision::new(
        NULLABLE_PASSWORD_REVISION,
        Some(USERS_AUTH_REVISION),
        "make users.password_hash nullable",
    )
    .on_upgrade(Change::set_nullable(
        USERS_TABLE,
        "password_hash",
        ColumnType::Varchar(None),
        true,
    ))
    .on_downgrade(Change::set_nullable(
        USERS_TABLE,
        "password_hash",
        ColumnType::Varchar(None),
        false,
    ));

    vec![add_auth, nullable_password]
}

pub fn revision_chain() -> Result<RevisionChain, RevisionError> {
    RevisionChain::new(revisions())
}
