pub mod settings;

pub use settings::{DatabaseSettings, MigrateSettings, Settings};
