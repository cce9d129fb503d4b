use thiserror::Error;

use crate::domain::{AccountNumber, Cents, format_cents};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {} (must be positive)", format_cents(*.0))]
    InvalidAmount(Cents),

    #[error(
        "Insufficient funds in account {account}: balance {}, required {}",
        format_cents(*.balance),
        format_cents(*.required)
    )]
    InsufficientFunds {
        account: AccountNumber,
        balance: Cents,
        required: Cents,
    },

    #[error("Cannot transfer from account {0} to itself")]
    SelfTransfer(AccountNumber),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    #[error("Concurrent update conflict (gave up after {attempts} attempts)")]
    Conflict { attempts: u32 },

    #[error("Operation timed out")]
    Timeout,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Credential processing failed: {0}")]
    Credentials(String),
}

impl LedgerError {
    /// Whether re-running the whole operation from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }

    /// Whether the failure is a business-rule rejection rather than an
    /// infrastructure problem.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::SelfTransfer(_)
                | LedgerError::AccountNotFound(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy(_) => LedgerError::Conflict { attempts: 1 },
            StoreError::PoolTimeout => LedgerError::Timeout,
            other => LedgerError::StoreUnavailable(other),
        }
    }
}
