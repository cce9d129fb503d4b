use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountNumber, Cents};

/// The closed set of events a ledger entry can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    /// Credit side of a transfer
    TransferIn,
    /// Debit side of a transfer
    TransferOut,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
    ];

    /// Tag persisted in the `transactions.transaction_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::TransferOut => "TRANSFER_OUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "TRANSFER_IN" => Some(TransactionType::TransferIn),
            "TRANSFER_OUT" => Some(TransactionType::TransferOut),
            _ => None,
        }
    }

    /// True when the entry increased the account balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::TransferIn)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable entry in the ledger log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Insertion order assigned by the store
    pub sequence: i64,
    pub account_number: AccountNumber,
    pub kind: TransactionType,
    /// Magnitude moved, always positive
    pub amount: Cents,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// The effect of this entry on its account's balance.
    pub fn signed_amount(&self) -> Cents {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}
