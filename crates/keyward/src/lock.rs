use crate::{
    account::{normalize_address, Account},
    errors::KeywardError,
    keystore::{
        cipher::{self, CipherError, SealedKey},
        SecretStore,
    },
};
use eyre::Context as _;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

/// When an unlock session stops authorizing signing.
///
/// A requested duration of zero means "unlocked until explicitly locked or
/// the process exits"; long-lived consumers rely on that convention.
#[derive(Debug, Clone, Copy)]
enum Deadline {
    Never,
    At(Instant),
}

/// A live unlock session. Holds the password-derived wrapping key (never the
/// plaintext private key) so each signing call can re-open the sealed blob on
/// demand. Dropped (and zeroized) on expiry or explicit lock.
struct UnlockSession {
    deadline: Deadline,
    wrap_key: Zeroizing<[u8; 32]>,
}

struct LockEntry {
    account: Account,
    session: Option<UnlockSession>,
}

/// Process-wide authorization state for signing, one entry per address.
///
/// This is the sole authority on whether an address may sign. It is meant to
/// be constructed once and shared by reference across every signing adapter;
/// independent instances do not stay synchronized. Lock state is never
/// persisted; a restart locks everything.
pub struct LockManager {
    store: Arc<dyn SecretStore>,
    entries: RwLock<HashMap<String, LockEntry>>,
}

impl LockManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register an address as known to the lock, initially Locked.
    ///
    /// Re-registering an address keeps any live unlock session (a second
    /// adapter loading the same accounts must not relock the first's state).
    pub fn add_account(&self, account: Account) {
        let mut entries = self.entries.write();
        entries
            .entry(account.address.clone())
            .or_insert(LockEntry {
                account,
                session: None,
            });
    }

    fn account_for(&self, normalized: &str) -> Option<Account> {
        self.entries.read().get(normalized).map(|e| e.account.clone())
    }

    async fn sealed_for(&self, account: &Account) -> eyre::Result<SealedKey> {
        let key = account.storage_key()?;
        let raw = self
            .store
            .get(&key)
            .await
            .context("read sealed key")?
            .ok_or_else(|| eyre::eyre!("no private key found in storage for {}", account.address))?;
        let sealed: SealedKey = serde_json::from_str(&raw).context("parse sealed key")?;
        Ok(sealed)
    }

    /// Attempt to unlock `address` for `duration` (zero = indefinitely).
    ///
    /// A wrong password is a recoverable outcome: returns `Ok(false)` and
    /// leaves the entry untouched (still Locked, or still Unlocked with its
    /// previous expiry). Storage and blob-corruption failures propagate.
    pub async fn unlock_account(
        &self,
        address: &str,
        password: &SecretString,
        duration: Duration,
    ) -> eyre::Result<bool> {
        let normalized = normalize_address(address);
        debug!(address = %normalized, duration_secs = duration.as_secs(), "unlocking account");

        let Some(account) = self.account_for(&normalized) else {
            return Ok(false);
        };
        let sealed = self.sealed_for(&account).await?;
        let salt = sealed.kdf_salt()?;
        let wrap_key = cipher::derive_wrap_key(password, &salt)?;
        match cipher::open_with_key(&sealed, &wrap_key) {
            // Password verified; the plaintext is dropped right here.
            Ok(_private_key) => {}
            Err(CipherError::WrongPassword) => return Ok(false),
            Err(e @ CipherError::Malformed(_)) => return Err(e.into()),
        }

        let deadline = if duration.is_zero() {
            Deadline::Never
        } else {
            Deadline::At(Instant::now() + duration)
        };

        // Last write wins if two unlocks race.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&normalized) {
            entry.session = Some(UnlockSession { deadline, wrap_key });
        }
        Ok(true)
    }

    /// Lazily evaluated: expiry is checked against the clock on every call,
    /// and an expired session's wrapping key is purged on sight.
    pub fn is_account_unlocked(&self, address: &str) -> bool {
        let normalized = normalize_address(address);
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&normalized) else {
            return false;
        };
        match &entry.session {
            None => false,
            Some(session) => match session.deadline {
                Deadline::Never => true,
                Deadline::At(t) if Instant::now() < t => true,
                Deadline::At(_) => {
                    entry.session = None;
                    false
                }
            },
        }
    }

    /// Explicitly drop an unlock session (no-op when already locked).
    pub fn lock_account(&self, address: &str) {
        let normalized = normalize_address(address);
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&normalized) {
            entry.session = None;
        }
    }

    /// Re-encrypt the stored key under a new password.
    ///
    /// Verifies `old_password` first; a wrong password returns `Ok(false)`
    /// with nothing mutated. On success the replacement is a single atomic
    /// store write, so there is no intermediate state in which neither
    /// password works, and a live unlock session is migrated to the new
    /// wrapping key so it keeps signing.
    pub async fn update_account(
        &self,
        address: &str,
        old_password: &SecretString,
        new_password: &SecretString,
    ) -> eyre::Result<bool> {
        let normalized = normalize_address(address);
        debug!(address = %normalized, "updating account password");

        let Some(account) = self.account_for(&normalized) else {
            return Ok(false);
        };
        let sealed = self.sealed_for(&account).await?;
        let private_key = match cipher::open(&sealed, old_password) {
            Ok(pk) => pk,
            Err(CipherError::WrongPassword) => return Ok(false),
            Err(e @ CipherError::Malformed(_)) => return Err(e.into()),
        };

        let new_salt = cipher::random_salt16();
        let new_wrap_key = cipher::derive_wrap_key(new_password, &new_salt)?;
        let resealed = cipher::seal_with_key(&private_key, &new_wrap_key, &new_salt)?;
        drop(private_key);

        let value = serde_json::to_string(&resealed).context("serialize sealed key")?;
        self.store
            .set(&account.storage_key()?, &value)
            .await
            .context("persist resealed key")?;

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&normalized) {
            if let Some(session) = entry.session.as_mut() {
                session.wrap_key = new_wrap_key;
            }
        }
        Ok(true)
    }

    /// Decrypt the private-key payload for a currently unlocked address.
    ///
    /// Fails with [`KeywardError::AuthenticationRequired`] before touching
    /// storage when the address is locked. The returned buffer zeroizes on
    /// drop; callers must not stash it anywhere longer-lived than one
    /// operation.
    pub(crate) async fn unlocked_key_material(
        &self,
        address: &str,
    ) -> eyre::Result<Zeroizing<Vec<u8>>> {
        let normalized = normalize_address(address);
        if !self.is_account_unlocked(&normalized) {
            return Err(KeywardError::AuthenticationRequired.into());
        }

        let (account, wrap_key) = {
            let entries = self.entries.read();
            let Some(entry) = entries.get(&normalized) else {
                return Err(KeywardError::AuthenticationRequired.into());
            };
            let Some(session) = entry.session.as_ref() else {
                return Err(KeywardError::AuthenticationRequired.into());
            };
            (entry.account.clone(), session.wrap_key.clone())
        };

        let sealed = self.sealed_for(&account).await?;
        let private_key = cipher::open_with_key(&sealed, &wrap_key)
            .map_err(|e| eyre::eyre!("sealed key no longer opens with the session key: {e}"))?;
        Ok(private_key)
    }
}
