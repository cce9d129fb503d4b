use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountNumber, AccountProfile, Cents, TransactionRecord, TransactionType,
};

use super::{MIGRATION_001_INITIAL, StoreError, UnitOfWork};

/// Consistent read of everything needed to reconcile the ledger.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub accounts: Vec<Account>,
    pub replayed: HashMap<AccountNumber, Cents>,
    pub record_count: i64,
}

/// Handle to the SQLite store backing accounts and the ledger log.
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool on `config.database_path`. The file must already exist
    /// unless `create_if_missing` is set.
    pub async fn connect(config: &LedgerConfig, create_if_missing: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database {}",
                    config.database_path.display()
                )
            })?;

        debug!(path = %config.database_path.display(), "database pool opened");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// The underlying pool, for administrative access.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start an atomic unit of work.
    pub async fn begin(&self) -> Result<UnitOfWork, StoreError> {
        UnitOfWork::begin(&self.pool).await
    }

    // ========================
    // Account directory
    // ========================

    /// Insert a new account with a zero balance.
    pub async fn insert_account(
        &self,
        full_name: &str,
        email: &str,
        pin_hash: &str,
    ) -> Result<AccountProfile, StoreError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let row = sqlx::query(
            r#"
            INSERT INTO accounts (full_name, email, pin_hash, balance_cents, created_at)
            VALUES (?, ?, ?, 0, ?)
            RETURNING account_number, full_name, email, created_at
            "#,
        )
        .bind(full_name)
        .bind(email)
        .bind(pin_hash)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_profile(&row)
    }

    pub async fn get_profile(
        &self,
        account_number: AccountNumber,
    ) -> Result<Option<AccountProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT account_number, full_name, email, created_at
            FROM accounts
            WHERE account_number = ?
            "#,
        )
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    /// Stored PHC hash of the account's PIN.
    pub async fn get_pin_hash(
        &self,
        account_number: AccountNumber,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT pin_hash FROM accounts WHERE account_number = ?")
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("pin_hash")))
    }

    // ========================
    // Balance and history queries
    // ========================

    /// Single-statement balance read outside any unit of work.
    pub async fn read_balance(
        &self,
        account_number: AccountNumber,
    ) -> Result<Option<Cents>, StoreError> {
        let row = sqlx::query("SELECT balance_cents FROM accounts WHERE account_number = ?")
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("balance_cents")))
    }

    /// Most recent `limit` ledger entries for an account, newest first.
    pub async fn history(
        &self,
        account_number: AccountNumber,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, account_number, transaction_type, amount_cents, created_at
            FROM transactions
            WHERE account_number = ?
            ORDER BY sequence DESC
            LIMIT ?
            "#,
        )
        .bind(account_number)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Read every stored balance together with the balance its log implies,
    /// inside a single read transaction.
    pub async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        let account_rows = sqlx::query(
            "SELECT account_number, balance_cents FROM accounts ORDER BY account_number",
        )
        .fetch_all(&mut *tx)
        .await?;

        let replayed_rows = sqlx::query(
            r#"
            SELECT
                account_number,
                SUM(CASE WHEN transaction_type IN ('DEPOSIT', 'TRANSFER_IN')
                         THEN amount_cents ELSE -amount_cents END) AS replayed
            FROM transactions
            GROUP BY account_number
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let record_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM transactions")
            .fetch_one(&mut *tx)
            .await?
            .get("count");

        tx.commit().await?;

        let accounts: Vec<Account> = account_rows
            .iter()
            .map(|row| Account {
                account_number: row.get("account_number"),
                balance: row.get("balance_cents"),
            })
            .collect();

        let replayed: HashMap<AccountNumber, Cents> = replayed_rows
            .iter()
            .map(|row| (row.get("account_number"), row.get("replayed")))
            .collect();

        Ok(LedgerSnapshot {
            accounts,
            replayed,
            record_count,
        })
    }

    fn row_to_profile(row: &SqliteRow) -> Result<AccountProfile, StoreError> {
        let created_at_str: String = row.get("created_at");

        Ok(AccountProfile {
            account_number: row.get("account_number"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    pub(crate) fn row_to_record(row: &SqliteRow) -> Result<TransactionRecord, StoreError> {
        let kind_str: String = row.get("transaction_type");
        let created_at_str: String = row.get("created_at");

        Ok(TransactionRecord {
            sequence: row.get("sequence"),
            account_number: row.get("account_number"),
            kind: TransactionType::from_str(&kind_str).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown transaction type {kind_str:?}"))
            })?,
            amount: row.get("amount_cents"),
            timestamp: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {value:?}: {e}")))
}
