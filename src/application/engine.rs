use std::future::Future;

use anyhow::Result as SetupResult;
use tracing::{debug, info, instrument, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    AccountNumber, Cents, ReconciliationReport, TransactionRecord, TransactionType,
    build_reconciliation_report,
};
use crate::storage::{Repository, UnitOfWork};

use super::LedgerError;

/// A balance mutation, applied as one unit of work.
#[derive(Debug, Clone, Copy)]
enum Mutation {
    Deposit {
        account: AccountNumber,
        amount: Cents,
    },
    Withdraw {
        account: AccountNumber,
        amount: Cents,
    },
    Transfer {
        from: AccountNumber,
        to: AccountNumber,
        amount: Cents,
    },
}

impl Mutation {
    fn amount(&self) -> Cents {
        match *self {
            Mutation::Deposit { amount, .. }
            | Mutation::Withdraw { amount, .. }
            | Mutation::Transfer { amount, .. } => amount,
        }
    }

    /// Checks that need no store access, in the order callers observe them.
    fn validate(&self) -> Result<(), LedgerError> {
        let amount = self.amount();
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if let Mutation::Transfer { from, to, .. } = *self {
            if from == to {
                return Err(LedgerError::SelfTransfer(from));
            }
        }
        Ok(())
    }
}

/// Applies deposits, withdrawals and transfers atomically, and answers
/// balance and history queries.
///
/// Every mutation runs inside a [`UnitOfWork`]: the balance change(s) and
/// their ledger entries commit together or not at all. Contended units are
/// retried from scratch, and every attempt is bounded by
/// [`LedgerConfig::operation_timeout`].
#[derive(Clone)]
pub struct LedgerEngine {
    repo: Repository,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    /// Create (if needed) and migrate the database, then build an engine on it.
    pub async fn init(config: LedgerConfig) -> SetupResult<Self> {
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: LedgerConfig) -> SetupResult<Self> {
        let repo = Repository::connect(&config, false).await?;
        Ok(Self::new(repo, config))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Queries
    // ========================

    /// Current balance of an account.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, account: AccountNumber) -> Result<Cents, LedgerError> {
        self.bounded(async {
            self.repo
                .read_balance(account)
                .await?
                .ok_or(LedgerError::AccountNotFound(account))
        })
        .await
    }

    /// Most recent ledger entries for an account, newest first.
    /// `None` uses the configured default limit.
    #[instrument(skip(self))]
    pub async fn get_history(
        &self,
        account: AccountNumber,
        limit: Option<u32>,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let limit = limit.unwrap_or(self.config.history_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.bounded(async { Ok::<_, LedgerError>(self.repo.history(account, limit).await?) })
            .await
    }

    /// Compare every stored balance with the balance replayed from its log.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconciliationReport, LedgerError> {
        let snapshot = self
            .bounded(async { Ok::<_, LedgerError>(self.repo.ledger_snapshot().await?) })
            .await?;

        let report = build_reconciliation_report(
            &snapshot.accounts,
            &snapshot.replayed,
            snapshot.record_count,
        );
        if !report.is_consistent() {
            warn!(
                discrepancies = report.discrepancies.len(),
                "ledger does not reconcile"
            );
        }
        Ok(report)
    }

    // ========================
    // Mutations
    // ========================

    /// Credit `amount` to an account. Returns the new balance.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        account: AccountNumber,
        amount: Cents,
    ) -> Result<Cents, LedgerError> {
        self.execute(Mutation::Deposit { account, amount }).await
    }

    /// Debit `amount` from an account if its balance covers it.
    /// Returns the new balance.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        account: AccountNumber,
        amount: Cents,
    ) -> Result<Cents, LedgerError> {
        self.execute(Mutation::Withdraw { account, amount }).await
    }

    /// Move `amount` from one account to another.
    /// Returns the source account's new balance.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from: AccountNumber,
        to: AccountNumber,
        amount: Cents,
    ) -> Result<Cents, LedgerError> {
        self.execute(Mutation::Transfer { from, to, amount }).await
    }

    /// Validate, then run the mutation, retrying from scratch on conflict.
    async fn execute(&self, mutation: Mutation) -> Result<Cents, LedgerError> {
        mutation.validate()?;

        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;
        loop {
            match self.bounded(self.apply(mutation)).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, ?mutation, "conflict, retrying unit of work");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(LedgerError::Conflict { .. }) => {
                    warn!(attempts = attempt, ?mutation, "giving up after repeated conflicts");
                    return Err(LedgerError::Conflict { attempts: attempt });
                }
                result => return result,
            }
        }
    }

    /// One attempt: begin, run the steps, commit; roll back on any failure.
    async fn apply(&self, mutation: Mutation) -> Result<Cents, LedgerError> {
        let mut uow = self.repo.begin().await?;

        let outcome = match mutation {
            Mutation::Deposit { account, amount } => deposit_steps(&mut uow, account, amount).await,
            Mutation::Withdraw { account, amount } => {
                withdraw_steps(&mut uow, account, amount).await
            }
            Mutation::Transfer { from, to, amount } => {
                transfer_steps(&mut uow, from, to, amount).await
            }
        };

        match outcome {
            Ok(balance) => {
                uow.commit().await?;
                info!(?mutation, balance, "mutation committed");
                Ok(balance)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    // The connection discards the open transaction when it is returned.
                    warn!(error = %rollback_err, "explicit rollback failed");
                }
                if err.is_rejection() {
                    debug!(?mutation, error = %err, "mutation rejected, rolled back");
                } else {
                    warn!(?mutation, error = %err, "mutation failed, rolled back");
                }
                Err(err)
            }
        }
    }

    /// Run `work` under the configured operation deadline. On expiry the
    /// future is dropped, which rolls back any open unit of work.
    async fn bounded<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.config.operation_timeout, "operation timed out");
                Err(LedgerError::Timeout)
            }
        }
    }
}

async fn deposit_steps(
    uow: &mut UnitOfWork,
    account: AccountNumber,
    amount: Cents,
) -> Result<Cents, LedgerError> {
    let balance = credit(uow, account, amount).await?;
    uow.append(account, TransactionType::Deposit, amount).await?;
    Ok(balance)
}

async fn withdraw_steps(
    uow: &mut UnitOfWork,
    account: AccountNumber,
    amount: Cents,
) -> Result<Cents, LedgerError> {
    let balance = debit(uow, account, amount).await?;
    uow.append(account, TransactionType::Withdrawal, amount).await?;
    Ok(balance)
}

/// Debit the source, then credit the destination. The destination is not
/// looked up beforehand; a credit that touches no row aborts the whole unit
/// and the debit is rolled back with it.
async fn transfer_steps(
    uow: &mut UnitOfWork,
    from: AccountNumber,
    to: AccountNumber,
    amount: Cents,
) -> Result<Cents, LedgerError> {
    let from_balance = debit(uow, from, amount).await?;
    credit(uow, to, amount).await?;
    uow.append(from, TransactionType::TransferOut, amount).await?;
    uow.append(to, TransactionType::TransferIn, amount).await?;
    Ok(from_balance)
}

/// Floor-checked debit. When no row changes, re-read inside the same unit
/// to tell a missing account from a short balance.
async fn debit(
    uow: &mut UnitOfWork,
    account: AccountNumber,
    amount: Cents,
) -> Result<Cents, LedgerError> {
    if let Some(balance) = uow.debit_if_sufficient(account, amount).await? {
        return Ok(balance);
    }
    match uow.read_balance(account).await? {
        None => Err(LedgerError::AccountNotFound(account)),
        Some(balance) => Err(LedgerError::InsufficientFunds {
            account,
            balance,
            required: amount,
        }),
    }
}

async fn credit(
    uow: &mut UnitOfWork,
    account: AccountNumber,
    amount: Cents,
) -> Result<Cents, LedgerError> {
    if let Some(balance) = uow.credit(account, amount).await? {
        return Ok(balance);
    }
    match uow.read_balance(account).await? {
        None => Err(LedgerError::AccountNotFound(account)),
        // Account exists, so the credit was refused for overflowing
        Some(_) => Err(LedgerError::InvalidAmount(amount)),
    }
}
