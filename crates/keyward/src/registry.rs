use crate::{
    account::{normalize_address, Account},
    errors::KeywardError,
    keystore::SecretStore,
};
use chrono::{DateTime, Utc};
use eyre::Context as _;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::OnceCell;
use tracing::debug;

/// The set of custodied accounts, backed by the secret store.
///
/// The store is read exactly once per process lifetime: concurrent callers of
/// [`AccountRegistry::load_existing_accounts`] share a single in-flight load,
/// and the outcome is memoized *including failure*. A registry whose first
/// load failed stays poisoned until restart; every later caller sees the
/// original failure. This is a deliberate fail-fast contract, not incidental
/// caching (see DESIGN.md).
pub struct AccountRegistry {
    store: Arc<dyn SecretStore>,
    loaded: RwLock<BTreeMap<String, Account>>,
    init: OnceCell<Result<(), String>>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            loaded: RwLock::new(BTreeMap::new()),
            init: OnceCell::new(),
        }
    }

    /// Load every persisted account into memory (idempotent, single-flight).
    ///
    /// Returns the known accounts sorted by creation time; consumers rely on
    /// that ordering.
    pub async fn load_existing_accounts(&self) -> eyre::Result<Vec<Account>> {
        let outcome = self
            .init
            .get_or_init(|| async {
                match self.load_from_store().await {
                    Ok(accounts) => {
                        debug!(count = accounts.len(), "loaded persisted accounts");
                        let mut loaded = self.loaded.write();
                        for account in accounts {
                            loaded.insert(account.address.clone(), account);
                        }
                        Ok(())
                    }
                    Err(e) => Err(format!("{e:#}")),
                }
            })
            .await;

        match outcome {
            Ok(()) => Ok(self.list_accounts()),
            Err(msg) => Err(KeywardError::InitializationFailure(msg.clone()).into()),
        }
    }

    async fn load_from_store(&self) -> eyre::Result<Vec<Account>> {
        let keys = self.store.list_keys().await.context("list stored keys")?;
        Ok(keys
            .iter()
            .filter_map(|k| Account::parse_storage_key(k))
            .collect())
    }

    /// Accounts currently known, oldest first.
    pub fn list_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.loaded.read().values().cloned().collect();
        accounts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        accounts
    }

    /// Look up an account; an absent address is simply "not found".
    pub fn find_account(&self, address: Option<&str>) -> Option<Account> {
        let address = address?;
        self.loaded.read().get(&normalize_address(address)).cloned()
    }

    pub fn has_account(&self, address: Option<&str>) -> bool {
        self.find_account(address).is_some()
    }

    /// Persist a sealed key under a new account and make it visible.
    ///
    /// The in-memory set is only updated after the store write succeeds, so a
    /// half-added account is never observable.
    pub async fn add_account(
        &self,
        sealed_value: &str,
        address: &str,
        created_at: DateTime<Utc>,
    ) -> eyre::Result<Account> {
        let account = Account::new(address, created_at)?;
        if self.loaded.read().contains_key(&account.address) {
            return Err(KeywardError::AccountAlreadyExists.into());
        }

        let key = account.storage_key()?;
        self.store
            .set(&key, sealed_value)
            .await
            .context("persist sealed key")?;

        let lost_race = {
            let mut loaded = self.loaded.write();
            if loaded.contains_key(&account.address) {
                true
            } else {
                loaded.insert(account.address.clone(), account.clone());
                false
            }
        };
        if lost_race {
            // Another task registered the address while we were persisting;
            // drop our orphaned blob and report the duplicate.
            let _removed = self.store.remove(&key).await;
            return Err(KeywardError::AccountAlreadyExists.into());
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemorySecretStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: MemorySecretStore,
        list_calls: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemorySecretStore::new(),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn get(&self, key: &str) -> eyre::Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> eyre::Result<()> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> eyre::Result<bool> {
            self.inner.remove(key).await
        }
        async fn list_keys(&self) -> eyre::Result<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list_keys().await
        }
    }

    /// A store whose listing always fails, to exercise poisoned init.
    struct BrokenStore {
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for BrokenStore {
        async fn get(&self, _key: &str) -> eyre::Result<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> eyre::Result<()> {
            Ok(())
        }
        async fn remove(&self, _key: &str) -> eyre::Result<bool> {
            Ok(false)
        }
        async fn list_keys(&self) -> eyre::Result<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            eyre::bail!("keychain unavailable")
        }
    }

    fn account_key(iso: &str, bare_address: &str) -> String {
        format!("account--{iso}--{bare_address}")
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_underlying_read() -> eyre::Result<()> {
        let store = Arc::new(CountingStore::new());
        store
            .set(
                &account_key(
                    "2022-05-24T13:55:47.117Z",
                    "2d936b3ada6142b4248de1847c14fa2f4c5b63c3",
                ),
                "sealed-a",
            )
            .await?;
        store
            .set(
                &account_key(
                    "2021-01-02T03:04:05.006Z",
                    "f39fd6e51aad88f6f4ce6ab8827279cfffb92266",
                ),
                "sealed-b",
            )
            .await?;

        let registry = AccountRegistry::new(store.clone());
        let (a, b, c) = tokio::join!(
            registry.load_existing_accounts(),
            registry.load_existing_accounts(),
            registry.load_existing_accounts(),
        );
        let (a, b, c) = (a?, b?, c?);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

        // Oldest account first.
        let first = a.first().ok_or_else(|| eyre::eyre!("missing account"))?;
        assert_eq!(first.address, "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        Ok(())
    }

    #[tokio::test]
    async fn failed_load_is_memoized_without_retry() -> eyre::Result<()> {
        let store = Arc::new(BrokenStore {
            list_calls: AtomicUsize::new(0),
        });
        let registry = AccountRegistry::new(store.clone());

        let (a, b, c) = tokio::join!(
            registry.load_existing_accounts(),
            registry.load_existing_accounts(),
            registry.load_existing_accounts(),
        );
        for outcome in [a, b, c] {
            let err = match outcome {
                Ok(_) => eyre::bail!("load must fail"),
                Err(e) => e,
            };
            let domain = err
                .downcast_ref::<KeywardError>()
                .ok_or_else(|| eyre::eyre!("expected a domain error, got: {err:#}"))?;
            assert!(
                matches!(domain, KeywardError::InitializationFailure(msg) if msg.contains("keychain unavailable")),
                "unexpected error: {domain}"
            );
        }

        // A later call observes the same memoized failure, with no fresh read.
        assert!(registry.load_existing_accounts().await.is_err());
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_add_fails_without_mutating_state() -> eyre::Result<()> {
        let store = Arc::new(MemorySecretStore::new());
        let registry = AccountRegistry::new(store);
        let address = "0x2D936B3aDa6142b4248DE1847c14FA2F4c5B63C3";

        registry.add_account("sealed", address, Utc::now()).await?;
        let err = match registry.add_account("sealed2", address, Utc::now()).await {
            Ok(_) => eyre::bail!("duplicate add must fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<KeywardError>(),
            Some(KeywardError::AccountAlreadyExists)
        ));
        assert_eq!(registry.list_accounts().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn find_account_normalizes_and_tolerates_none() -> eyre::Result<()> {
        let registry = AccountRegistry::new(Arc::new(MemorySecretStore::new()));
        let address = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
        registry.add_account("sealed", address, Utc::now()).await?;

        assert!(registry.has_account(Some("0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266")));
        assert!(registry.has_account(Some("f39fd6e51aad88f6f4ce6ab8827279cfffb92266")));
        assert!(!registry.has_account(Some("0x0000000000000000000000000000000000000000")));
        assert!(!registry.has_account(None));
        Ok(())
    }
}
