use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::application::{AccountService, LedgerEngine};
use crate::config::LedgerConfig;
use crate::domain::{
    AccountNumber, AccountProfile, Cents, NewAccount, TransactionRecord, format_cents, parse_cents,
};

/// Tellerbook - account ledger with atomic deposits, withdrawals and transfers
#[derive(Parser)]
#[command(name = "tellerbook")]
#[command(about = "An account ledger with all-or-nothing deposits, withdrawals and transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(
        short,
        long,
        default_value = "tellerbook.db",
        env = "TELLERBOOK_DB",
        global = true
    )]
    pub database: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Deadline for a single operation, in milliseconds
    #[arg(long, env = "TELLERBOOK_TIMEOUT_MS", global = true)]
    pub timeout_ms: Option<u64>,

    /// Retries after a concurrent-update conflict
    #[arg(long, env = "TELLERBOOK_MAX_RETRIES", global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Account holder credentials
#[derive(Args)]
pub struct Credentials {
    /// Account number
    #[arg(short, long, env = "TELLERBOOK_ACCOUNT")]
    pub account: AccountNumber,

    /// Account PIN
    #[arg(long, env = "TELLERBOOK_PIN", hide_env_values = true)]
    pub pin: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open a new account with a zero balance
    Open {
        /// Account holder's full name
        full_name: String,

        /// Contact email (must be unique)
        email: String,

        /// PIN of at least four digits
        #[arg(long)]
        pin: String,
    },

    /// Show the authenticated account holder
    Whoami {
        #[command(flatten)]
        auth: Credentials,
    },

    /// Show the current balance
    Balance {
        #[command(flatten)]
        auth: Credentials,
    },

    /// Deposit money (e.g., "500.00" or "500")
    Deposit {
        amount: String,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Withdraw money
    Withdraw {
        amount: String,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Transfer money to another account
    Transfer {
        amount: String,

        /// Destination account number
        #[arg(long)]
        to: AccountNumber,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Show recent transactions, newest first
    History {
        #[command(flatten)]
        auth: Credentials,

        /// Maximum number of entries (default: 10)
        #[arg(short, long)]
        limit: Option<u32>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Verify that every balance matches its transaction log
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Build the engine configuration from the global flags.
    pub fn config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::new(self.database.clone());
        if let Some(ms) = self.timeout_ms {
            config = config.with_operation_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init => {
                LedgerEngine::init(config).await?;
                println!("Database initialized: {}", self.database.display());
            }

            Commands::Open {
                full_name,
                email,
                pin,
            } => {
                let (_, accounts) = open(config).await?;
                let profile = accounts
                    .open_account(NewAccount::new(full_name, email, pin))
                    .await?;
                println!("Account created");
                println!("  Account number: {}", profile.account_number);
                println!("  Holder:         {}", profile.full_name);
                println!("  Email:          {}", profile.email);
                println!("  Balance:        {}", format_cents(0));
                println!("Keep your account number; you need it to sign in.");
            }

            Commands::Whoami { auth } => {
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let balance = engine.get_balance(profile.account_number).await?;
                print_profile(&profile, balance);
            }

            Commands::Balance { auth } => {
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let balance = engine.get_balance(profile.account_number).await?;
                println!("Balance: {}", format_cents(balance));
            }

            Commands::Deposit { amount, auth } => {
                let amount = parse_amount(&amount)?;
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let balance = engine.deposit(profile.account_number, amount).await?;
                println!(
                    "Deposited {}. New balance: {}",
                    format_cents(amount),
                    format_cents(balance)
                );
            }

            Commands::Withdraw { amount, auth } => {
                let amount = parse_amount(&amount)?;
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let balance = engine.withdraw(profile.account_number, amount).await?;
                println!(
                    "Withdrew {}. New balance: {}",
                    format_cents(amount),
                    format_cents(balance)
                );
            }

            Commands::Transfer { amount, to, auth } => {
                let amount = parse_amount(&amount)?;
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let balance = engine
                    .transfer(profile.account_number, to, amount)
                    .await?;
                println!(
                    "Transferred {} {} -> {}. New balance: {}",
                    format_cents(amount),
                    profile.account_number,
                    to,
                    format_cents(balance)
                );
            }

            Commands::History {
                auth,
                limit,
                format,
            } => {
                let (engine, accounts) = open(config).await?;
                let profile = login(&accounts, &auth).await?;
                let records = engine.get_history(profile.account_number, limit).await?;
                print_history(&records, format)?;
            }

            Commands::Check { json } => {
                let (engine, _) = open(config).await?;
                let report = engine.reconcile().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("Accounts:     {}", report.account_count);
                    println!("Transactions: {}", report.record_count);
                    if report.is_consistent() {
                        println!("Ledger is consistent.");
                    } else {
                        println!();
                        println!("{:<10} {:>15} {:>15}", "ACCOUNT", "STORED", "REPLAYED");
                        println!("{}", "-".repeat(42));
                        for d in &report.discrepancies {
                            println!(
                                "{:<10} {:>15} {:>15}",
                                d.account_number,
                                format_cents(d.stored),
                                format_cents(d.replayed)
                            );
                        }
                        anyhow::bail!(
                            "{} account(s) do not match their transaction log",
                            report.discrepancies.len()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Connect to an existing database.
async fn open(config: LedgerConfig) -> Result<(LedgerEngine, AccountService)> {
    let engine = LedgerEngine::connect(config)
        .await
        .context("Could not open the database (run `tellerbook init` first?)")?;
    let accounts = AccountService::new(engine.repository().clone());
    Ok((engine, accounts))
}

async fn login(accounts: &AccountService, auth: &Credentials) -> Result<AccountProfile> {
    accounts
        .authenticate(auth.account, &auth.pin)
        .await
        .with_context(|| format!("Could not sign in to account {}", auth.account))
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn print_profile(profile: &AccountProfile, balance: Cents) {
    println!("Account: {}", profile.account_number);
    println!("  Holder:   {}", profile.full_name);
    println!("  Email:    {}", profile.email);
    println!("  Opened:   {}", profile.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Balance:  {}", format_cents(balance));
}

fn print_history(records: &[TransactionRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(["sequence", "timestamp", "type", "amount"])?;
            for record in records {
                writer.write_record([
                    record.sequence.to_string(),
                    record.timestamp.to_rfc3339(),
                    record.kind.to_string(),
                    format_cents(record.amount),
                ])?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            if records.is_empty() {
                println!("No transactions found.");
                return Ok(());
            }
            println!("{:<6} {:<20} {:<13} {:>15}", "#", "DATE", "TYPE", "AMOUNT");
            println!("{}", "-".repeat(57));
            for record in records {
                let signed = record.signed_amount();
                println!(
                    "{:<6} {:<20} {:<13} {:>15}",
                    record.sequence,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.kind,
                    format!("{}{}", if signed > 0 { "+" } else { "" }, format_cents(signed))
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_feed_config() {
        let cli = Cli::try_parse_from([
            "tellerbook",
            "--database",
            "/tmp/bank.db",
            "--timeout-ms",
            "250",
            "--max-retries",
            "0",
            "check",
        ])
        .unwrap();

        let config = cli.config();
        assert_eq!(config.database_path, PathBuf::from("/tmp/bank.db"));
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_attempts(), 1);
    }

    #[test]
    fn test_transfer_requires_destination() {
        let parsed = Cli::try_parse_from([
            "tellerbook", "transfer", "10.00", "--account", "1", "--pin", "1234",
        ]);
        assert!(parsed.is_err());
    }
}
