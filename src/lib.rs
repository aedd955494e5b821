pub mod config;
pub mod db;
pub mod revision;
pub mod schema;
pub mod targets;

pub use config::Settings;
pub use revision::{Change, Migrator, Revision, RevisionChain, RevisionError};
pub use schema::{
    evolve, plan, ColumnSpec, ColumnType, DefaultValue, Dialect, EvolutionResult, EvolveError,
    EvolveOptions, SchemaError, Strategy, TargetSchema,
};
