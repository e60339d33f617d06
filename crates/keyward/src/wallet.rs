use crate::{
    account::{derive_address, normalize_private_key, Account},
    chains::{evm::EvmSigner, ChainSigner, SignedTx},
    errors::KeywardError,
    keystore::cipher,
    lock::LockManager,
    registry::AccountRegistry,
    transport::Transport,
};
use alloy::{
    dyn_abi::TypedData,
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, Signature, B256, U256},
    rpc::types::TransactionRequest,
};
use chrono::Utc;
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::info;

/// The signing adapter: one chain/transport configuration wrapped around
/// shared custody state.
///
/// Construct as many of these as there are chains or transport modes; they
/// all share one [`AccountRegistry`] and one [`LockManager`] by `Arc`, so an
/// account added or unlocked through one adapter is immediately visible
/// through every other. Do not construct independent lock managers expecting
/// them to stay synchronized.
///
/// Every signing operation checks the lock first and fails with
/// [`KeywardError::AuthenticationRequired`] before any network or
/// cryptographic work.
pub struct Wallet {
    registry: Arc<AccountRegistry>,
    locks: Arc<LockManager>,
    signer: Arc<dyn ChainSigner>,
    transport: Transport,
}

impl Wallet {
    pub fn new(
        registry: Arc<AccountRegistry>,
        locks: Arc<LockManager>,
        signer: Arc<dyn ChainSigner>,
        transport: Transport,
    ) -> Self {
        Self {
            registry,
            locks,
            signer,
            transport,
        }
    }

    /// An adapter for the EVM chain family over `transport`.
    pub fn evm(
        registry: Arc<AccountRegistry>,
        locks: Arc<LockManager>,
        transport: Transport,
    ) -> Self {
        Self::new(registry, locks, Arc::new(EvmSigner), transport)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Load persisted accounts (single-flight, memoized) and register each
    /// with the lock manager in the Locked state.
    pub async fn load_existing_accounts(&self) -> eyre::Result<Vec<Account>> {
        let accounts = self.registry.load_existing_accounts().await?;
        for account in &accounts {
            self.locks.add_account(account.clone());
        }
        Ok(accounts)
    }

    pub fn has_account(&self, address: Option<&str>) -> bool {
        self.registry.has_account(address)
    }

    pub fn get_accounts(&self) -> Vec<String> {
        self.registry
            .list_accounts()
            .into_iter()
            .map(|a| a.address)
            .collect()
    }

    /// Derive the address for `private_key`, seal the key under `password`,
    /// persist it, and register the account, initially Locked.
    pub async fn add_account(
        &self,
        private_key: &SecretString,
        password: &SecretString,
    ) -> eyre::Result<String> {
        let normalized_key = normalize_private_key(private_key.expose_secret())?;
        let address = derive_address(&normalized_key)?;
        if self.registry.has_account(Some(&address)) {
            return Err(KeywardError::AccountAlreadyExists.into());
        }
        info!(address = %address, "adding account");

        let sealed = cipher::seal(normalized_key.as_bytes(), password)?;
        let value = serde_json::to_string(&sealed).context("serialize sealed key")?;
        let account = self.registry.add_account(&value, &address, Utc::now()).await?;
        self.locks.add_account(account);
        Ok(address)
    }

    pub async fn unlock_account(
        &self,
        address: &str,
        password: &SecretString,
        duration: Duration,
    ) -> eyre::Result<bool> {
        self.locks.unlock_account(address, password, duration).await
    }

    pub async fn update_account(
        &self,
        address: &str,
        old_password: &SecretString,
        new_password: &SecretString,
    ) -> eyre::Result<bool> {
        self.locks
            .update_account(address, old_password, new_password)
            .await
    }

    pub fn is_account_unlocked(&self, address: &str) -> bool {
        self.locks.is_account_unlocked(address)
    }

    pub fn lock_account(&self, address: &str) {
        self.locks.lock_account(address);
    }

    /// Sign a caller-populated transaction offline.
    pub async fn sign_transaction(
        &self,
        address: &str,
        tx: &TransactionRequest,
    ) -> eyre::Result<SignedTx> {
        let key = self.locks.unlocked_key_material(address).await?;
        self.signer.sign_transaction(&key, tx)
    }

    /// Fill, sign and broadcast a transaction over this adapter's transport.
    pub async fn send_transaction(
        &self,
        address: &str,
        tx: TransactionRequest,
    ) -> eyre::Result<B256> {
        let key = self.locks.unlocked_key_material(address).await?;
        self.signer.send_transaction(&key, tx, &self.transport).await
    }

    /// Convenience for contract writes: wraps calldata in a transaction and
    /// sends it.
    pub async fn send_contract_call(
        &self,
        address: &str,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> eyre::Result<B256> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_value(value);
        self.send_transaction(address, tx).await
    }

    pub async fn sign_message(&self, address: &str, message: &[u8]) -> eyre::Result<Signature> {
        let key = self.locks.unlocked_key_material(address).await?;
        self.signer.sign_message(&key, message)
    }

    pub async fn sign_typed_data(
        &self,
        address: &str,
        typed_data: &TypedData,
    ) -> eyre::Result<Signature> {
        let key = self.locks.unlocked_key_material(address).await?;
        self.signer.sign_typed_data(&key, typed_data)
    }
}
