mod error;
mod repository;
mod unit_of_work;

pub use error::*;
pub use repository::*;
pub use unit_of_work::*;

/// SQL migration for the account store and ledger log
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
