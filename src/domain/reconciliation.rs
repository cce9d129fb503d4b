use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Account, AccountNumber, Cents, TransactionRecord};

/// Replay a single account's log into the balance it implies.
pub fn replay_balance(account_number: AccountNumber, records: &[TransactionRecord]) -> Cents {
    records
        .iter()
        .filter(|r| r.account_number == account_number)
        .fold(0, |balance, record| balance + record.signed_amount())
}

/// An account whose stored balance disagrees with its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub account_number: AccountNumber,
    pub stored: Cents,
    pub replayed: Cents,
}

/// Result of comparing every stored balance against its replayed log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub account_count: i64,
    pub record_count: i64,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Build a report from stored balances and per-account log sums.
/// Accounts missing from `replayed` have no log entries and replay to zero.
pub fn build_reconciliation_report(
    accounts: &[Account],
    replayed: &HashMap<AccountNumber, Cents>,
    record_count: i64,
) -> ReconciliationReport {
    let mut discrepancies: Vec<Discrepancy> = accounts
        .iter()
        .filter_map(|account| {
            let replayed = replayed.get(&account.account_number).copied().unwrap_or(0);
            (replayed != account.balance).then_some(Discrepancy {
                account_number: account.account_number,
                stored: account.balance,
                replayed,
            })
        })
        .collect();
    discrepancies.sort_by_key(|d| d.account_number);

    ReconciliationReport {
        account_count: accounts.len() as i64,
        record_count,
        discrepancies,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::TransactionType;

    fn account(account_number: AccountNumber, balance: Cents) -> Account {
        Account {
            account_number,
            balance,
        }
    }

    fn entry(
        sequence: i64,
        account: AccountNumber,
        kind: TransactionType,
        amount: Cents,
    ) -> TransactionRecord {
        TransactionRecord {
            sequence,
            account_number: account,
            kind,
            amount,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_replay_empty_log() {
        assert_eq!(replay_balance(1, &[]), 0);
    }

    #[test]
    fn test_replay_mixed_log() {
        let log = vec![
            entry(1, 1, TransactionType::Deposit, 100_000),
            entry(2, 1, TransactionType::TransferOut, 40_000),
            entry(3, 2, TransactionType::TransferIn, 40_000),
            entry(4, 1, TransactionType::Withdrawal, 10_000),
        ];

        assert_eq!(replay_balance(1, &log), 50_000);
        assert_eq!(replay_balance(2, &log), 40_000);
        assert_eq!(replay_balance(3, &log), 0);
    }

    #[test]
    fn test_report_flags_only_mismatched_accounts() {
        let accounts = vec![account(2, 999), account(1, 500), account(3, 0)];
        let replayed = HashMap::from([(1, 500), (2, 400)]);

        let report = build_reconciliation_report(&accounts, &replayed, 3);

        assert!(!report.is_consistent());
        assert_eq!(report.account_count, 3);
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy {
                account_number: 2,
                stored: 999,
                replayed: 400,
            }]
        );
    }

    #[test]
    fn test_untouched_accounts_are_consistent() {
        let accounts = vec![account(1, 0)];
        let report = build_reconciliation_report(&accounts, &HashMap::new(), 0);
        assert!(report.is_consistent());
    }
}
