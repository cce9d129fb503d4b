use chrono::{SecondsFormat, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::domain::{AccountNumber, Cents, TransactionRecord, TransactionType};

use super::{Repository, StoreError};

/// An open database transaction over the account store and the ledger log.
///
/// Nothing written through a `UnitOfWork` is visible to other connections
/// until [`commit`](Self::commit) succeeds. Dropping it without committing
/// (early return, timeout cancellation, panic) rolls everything back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        let tx = pool.begin().await?;
        debug!("unit of work started");
        Ok(Self { tx })
    }

    /// Current balance, or `None` if the account does not exist.
    pub async fn read_balance(
        &mut self,
        account_number: AccountNumber,
    ) -> Result<Option<Cents>, StoreError> {
        let row = sqlx::query("SELECT balance_cents FROM accounts WHERE account_number = ?")
            .bind(account_number)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|row| row.get("balance_cents")))
    }

    /// Add `amount` to the balance and return the new balance.
    ///
    /// Returns `None` when no row was affected: the account does not exist,
    /// or the addition would overflow.
    pub async fn credit(
        &mut self,
        account_number: AccountNumber,
        amount: Cents,
    ) -> Result<Option<Cents>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?
            WHERE account_number = ? AND balance_cents <= ?
            RETURNING balance_cents
            "#,
        )
        .bind(amount)
        .bind(account_number)
        .bind(Cents::MAX - amount)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|row| row.get("balance_cents")))
    }

    /// Subtract `amount` only if the balance covers it, as one statement.
    ///
    /// Returns `None` when no row was affected: the account does not exist,
    /// or its balance is below `amount`.
    pub async fn debit_if_sufficient(
        &mut self,
        account_number: AccountNumber,
        amount: Cents,
    ) -> Result<Option<Cents>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents - ?
            WHERE account_number = ? AND balance_cents >= ?
            RETURNING balance_cents
            "#,
        )
        .bind(amount)
        .bind(account_number)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|row| row.get("balance_cents")))
    }

    /// Append a ledger entry. Its timestamp is never earlier than the
    /// previous entry's, even if the wall clock steps backwards.
    pub async fn append(
        &mut self,
        account_number: AccountNumber,
        kind: TransactionType,
        amount: Cents,
    ) -> Result<TransactionRecord, StoreError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let row = sqlx::query(
            r#"
            INSERT INTO transactions (account_number, transaction_type, amount_cents, created_at)
            VALUES (?, ?, ?, MAX(?, COALESCE(
                (SELECT created_at FROM transactions ORDER BY sequence DESC LIMIT 1), ''
            )))
            RETURNING sequence, account_number, transaction_type, amount_cents, created_at
            "#,
        )
        .bind(account_number)
        .bind(kind.as_str())
        .bind(amount)
        .bind(&now)
        .fetch_one(&mut *self.tx)
        .await?;

        Repository::row_to_record(&row)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        debug!("unit of work committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        debug!("unit of work rolled back");
        Ok(())
    }
}
