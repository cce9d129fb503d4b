// Application layer: the ledger engine and the account directory.
// Both hold a `Repository` handle; neither keeps process-wide state.

mod accounts;
mod engine;
pub mod error;

pub use accounts::*;
pub use engine::*;
pub use error::*;
