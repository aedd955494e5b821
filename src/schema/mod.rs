//! Idempotent, additive schema evolution: compare the columns a table has
//! with the columns a caller wants and add the difference.

pub mod column;
pub mod dialect;
pub mod error;
pub mod evolve;
pub mod introspect;

pub use column::{ColumnSpec, ColumnType, DefaultValue, ParseColumnError};
pub use dialect::Dialect;
pub use error::{EvolveError, SchemaError};
pub use evolve::{
    evolve, plan, ColumnOutcome, ColumnReport, Delta, EvolutionResult, EvolveOptions, Strategy,
    TargetSchema,
};
pub use introspect::{observe, ObservedColumn, ObservedSchema};
