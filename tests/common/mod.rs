// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tellerbook::application::{AccountService, LedgerEngine};
use tellerbook::config::LedgerConfig;
use tellerbook::domain::{AccountNumber, Cents};
use tempfile::TempDir;

/// Helper to create a test engine with a temporary database
pub async fn test_engine() -> Result<(LedgerEngine, TempDir)> {
    test_engine_with(|config| config).await
}

/// Helper to create a test engine with a tweaked configuration
pub async fn test_engine_with(
    tweak: impl FnOnce(LedgerConfig) -> LedgerConfig,
) -> Result<(LedgerEngine, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = tweak(LedgerConfig::new(temp_dir.path().join("test.db")));
    let engine = LedgerEngine::init(config).await?;
    Ok((engine, temp_dir))
}

/// Account service sharing the engine's database
pub fn account_service(engine: &LedgerEngine) -> AccountService {
    AccountService::new(engine.repository().clone())
}

/// Insert an account directly, skipping PIN hashing. Ledger tests never sign in.
pub async fn open_account(engine: &LedgerEngine, name: &str) -> Result<AccountNumber> {
    let email = format!("{}@example.test", name.to_lowercase().replace(' ', "."));
    let profile = engine
        .repository()
        .insert_account(name, &email, "unused")
        .await?;
    Ok(profile.account_number)
}

/// Open an account and deposit an opening balance into it
pub async fn open_funded(
    engine: &LedgerEngine,
    name: &str,
    balance: Cents,
) -> Result<AccountNumber> {
    let account = open_account(engine, name).await?;
    if balance > 0 {
        engine.deposit(account, balance).await?;
    }
    Ok(account)
}

/// Make every append of `transaction_type` fail, as if the store broke mid-unit
pub async fn fail_appends_of(engine: &LedgerEngine, transaction_type: &str) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TRIGGER fail_{kind} BEFORE INSERT ON transactions
        WHEN NEW.transaction_type = '{kind_upper}'
        BEGIN
            SELECT RAISE(ABORT, 'injected failure');
        END
        "#,
        kind = transaction_type.to_lowercase(),
        kind_upper = transaction_type,
    );
    sqlx::query(&sql).execute(engine.repository().pool()).await?;
    Ok(())
}

/// Remove a trigger installed by [`fail_appends_of`]
pub async fn heal_appends_of(engine: &LedgerEngine, transaction_type: &str) -> Result<()> {
    let sql = format!(
        "DROP TRIGGER IF EXISTS fail_{}",
        transaction_type.to_lowercase()
    );
    sqlx::query(&sql).execute(engine.repository().pool()).await?;
    Ok(())
}
