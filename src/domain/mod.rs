mod account;
mod money;
mod reconciliation;
mod transaction;

pub use account::*;
pub use money::*;
pub use reconciliation::*;
pub use transaction::*;
