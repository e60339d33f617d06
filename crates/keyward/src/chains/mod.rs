pub mod evm;

use crate::transport::Transport;
use alloy::{
    dyn_abi::TypedData,
    primitives::{Bytes, Signature, B256},
    rpc::types::TransactionRequest,
};
use async_trait::async_trait;

/// A transaction signed and ready to broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: B256,
}

/// Chain-family-specific signing mechanism.
///
/// The signing adapter gates every call behind the lock manager and hands the
/// decrypted key material in transiently; implementations must not retain it.
#[async_trait]
pub trait ChainSigner: Send + Sync {
    /// Sign a fully-populated transaction request offline.
    fn sign_transaction(&self, key: &[u8], tx: &TransactionRequest) -> eyre::Result<SignedTx>;

    /// Fill in chain id / fees / nonce / gas from the transport, sign, and
    /// broadcast. Returns the transaction hash.
    async fn send_transaction(
        &self,
        key: &[u8],
        tx: TransactionRequest,
        transport: &Transport,
    ) -> eyre::Result<B256>;

    /// EIP-191 personal-message signature.
    fn sign_message(&self, key: &[u8], message: &[u8]) -> eyre::Result<Signature>;

    /// EIP-712 typed-data signature.
    fn sign_typed_data(&self, key: &[u8], typed_data: &TypedData) -> eyre::Result<Signature>;
}
