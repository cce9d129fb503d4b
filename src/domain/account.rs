use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

/// Store-assigned account identifier. Always positive, never reused.
pub type AccountNumber = i64;

/// Minimum number of digits in an account PIN.
pub const MIN_PIN_LENGTH: usize = 4;

/// The ledger's view of an account: an identifier and a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_number: AccountNumber,
    /// Never negative.
    pub balance: Cents,
}

/// Holder details for an account. Owned by the account directory,
/// never consulted by balance mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_number: AccountNumber,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Registration request for a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub full_name: String,
    pub email: String,
    pub pin: String,
}

impl NewAccount {
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        pin: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into(),
            pin: pin.into(),
        }
    }

    /// Check the registration fields, returning the trimmed name and email.
    pub fn validate(&self) -> Result<(String, String), RegistrationError> {
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(RegistrationError::BlankName);
        }

        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(RegistrationError::InvalidEmail(self.email.clone()));
        }

        if self.pin.len() < MIN_PIN_LENGTH || !self.pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(RegistrationError::WeakPin);
        }

        Ok((full_name.to_string(), email.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    BlankName,
    InvalidEmail(String),
    WeakPin,
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::BlankName => write!(f, "full name must not be blank"),
            RegistrationError::InvalidEmail(email) => write!(f, "invalid email address: {email:?}"),
            RegistrationError::WeakPin => {
                write!(f, "PIN must be at least {MIN_PIN_LENGTH} digits")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}
