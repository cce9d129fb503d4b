use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tracing::{info, instrument, warn};

use crate::domain::{AccountNumber, AccountProfile, NewAccount};
use crate::storage::{Repository, StoreError};

use super::LedgerError;

/// Registration and PIN authentication for account holders.
///
/// New accounts always start at a zero balance; this service never touches
/// balances afterwards.
#[derive(Clone)]
pub struct AccountService {
    repo: Repository,
}

impl AccountService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Register a new account holder and return the assigned account.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn open_account(&self, request: NewAccount) -> Result<AccountProfile, LedgerError> {
        let (full_name, email) = request
            .validate()
            .map_err(|e| LedgerError::InvalidRegistration(e.to_string()))?;

        let pin = request.pin;
        let pin_hash = tokio::task::spawn_blocking(move || hash_pin(&pin))
            .await
            .map_err(|e| LedgerError::Credentials(e.to_string()))??;

        let profile = match self.repo.insert_account(&full_name, &email, &pin_hash).await {
            Ok(profile) => profile,
            Err(StoreError::Duplicate(_)) => return Err(LedgerError::EmailTaken(email)),
            Err(err) => return Err(err.into()),
        };

        info!(account = profile.account_number, "account opened");
        Ok(profile)
    }

    /// Check a PIN and return the holder's profile.
    ///
    /// Unknown accounts and wrong PINs fail the same way.
    #[instrument(skip(self, pin))]
    pub async fn authenticate(
        &self,
        account: AccountNumber,
        pin: &str,
    ) -> Result<AccountProfile, LedgerError> {
        let Some(stored_hash) = self.repo.get_pin_hash(account).await? else {
            warn!("authentication failed");
            return Err(LedgerError::AuthenticationFailed);
        };

        let pin = pin.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_pin(&pin, &stored_hash))
            .await
            .map_err(|e| LedgerError::Credentials(e.to_string()))??;

        if !verified {
            warn!("authentication failed");
            return Err(LedgerError::AuthenticationFailed);
        }

        self.get_profile(account).await
    }

    pub async fn get_profile(&self, account: AccountNumber) -> Result<AccountProfile, LedgerError> {
        self.repo
            .get_profile(account)
            .await?
            .ok_or(LedgerError::AccountNotFound(account))
    }
}

fn hash_pin(pin: &str) -> Result<String, LedgerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LedgerError::Credentials(e.to_string()))
}

fn verify_pin(pin: &str, stored_hash: &str) -> Result<bool, LedgerError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| LedgerError::Credentials(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok())
}
