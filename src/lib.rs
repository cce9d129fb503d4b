pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod storage;
pub mod telemetry;

pub use application::{AccountService, LedgerEngine, LedgerError};
pub use config::LedgerConfig;
pub use domain::*;
pub use storage::Repository;
