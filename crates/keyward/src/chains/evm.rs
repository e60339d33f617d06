use crate::{
    account::normalize_private_key,
    chains::{ChainSigner, SignedTx},
    transport::Transport,
};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    dyn_abi::TypedData,
    eips::eip2718::Encodable2718 as _,
    primitives::{Bytes, Signature, TxKind, B256, U256},
    providers::Provider as _,
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
};
use async_trait::async_trait;
use eyre::Context as _;
use tracing::debug;
use zeroize::Zeroizing;

/// Signing for the EVM chain family (Celo, Ethereum and friends; they only
/// differ by chain id and transport here).
pub struct EvmSigner;

/// Parse the decrypted key payload (`0x`-prefixed hex, UTF-8) into a signer.
fn signer_from_key(key: &[u8]) -> eyre::Result<PrivateKeySigner> {
    let s = std::str::from_utf8(key).context("key material must be utf-8 hex")?;
    let normalized = normalize_private_key(s)?;
    let bare = normalized.strip_prefix("0x").unwrap_or(normalized.as_str());
    let bytes = Zeroizing::new(hex::decode(bare).context("decode private key hex")?);
    PrivateKeySigner::from_slice(&bytes).context("parse private key")
}

pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    // Conservative fee policy:
    // - priority: max(1.5 gwei, gas_price / 10)
    // - max_fee: base_fee * 2 + priority
    let min_priority: u128 = 1_500_000_000; // 1.5 gwei
    let priority = std::cmp::max(min_priority, gas_price / 10);

    let mut max_fee = base_fee.saturating_mul(2).saturating_add(priority);
    let min_fee = base_fee.saturating_add(priority);
    if max_fee < min_fee {
        max_fee = min_fee;
    }
    (max_fee, priority)
}

/// Apply the "prefer EIP-1559 when supported" fee policy to a transaction.
///
/// Pure helper so fee selection is unit-testable without provider variance.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
    from: alloy::primitives::Address,
    chain_id: u64,
) -> TransactionRequest {
    // If the caller already set explicit fee fields, don't override them.
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }

    if tx.chain_id.is_none() {
        tx.chain_id = Some(chain_id);
    }
    if tx.from.is_none() {
        tx.from = Some(from);
    }

    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// Build and sign a consensus transaction from a populated `TransactionRequest`.
fn build_and_sign_tx(
    signer: &PrivateKeySigner,
    tx: &TransactionRequest,
) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.unwrap_or(0);
    let gas_limit = tx.gas.unwrap_or(21_000);

    if tx.max_fee_per_gas.is_some() {
        // EIP-1559
        let consensus_tx = TxEip1559 {
            chain_id: tx.chain_id.unwrap_or(1),
            nonce,
            gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas.unwrap_or(0),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let hash = consensus_tx.signature_hash();
        let sig = signer.sign_hash_sync(&hash).context("sign eip1559")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Eip1559(signed_tx), tx_hash))
    } else {
        // Legacy
        let consensus_tx = TxLegacy {
            chain_id: tx.chain_id,
            nonce,
            gas_price: tx.gas_price.unwrap_or(0),
            gas_limit,
            to,
            value,
            input,
        };
        let hash = consensus_tx.signature_hash();
        let sig = signer.sign_hash_sync(&hash).context("sign legacy")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Legacy(signed_tx), tx_hash))
    }
}

#[async_trait]
impl ChainSigner for EvmSigner {
    fn sign_transaction(&self, key: &[u8], tx: &TransactionRequest) -> eyre::Result<SignedTx> {
        let signer = signer_from_key(key)?;
        let (envelope, hash) = build_and_sign_tx(&signer, tx)?;
        Ok(SignedTx {
            raw: Bytes::from(envelope.encoded_2718()),
            hash,
        })
    }

    async fn send_transaction(
        &self,
        key: &[u8],
        mut tx: TransactionRequest,
        transport: &Transport,
    ) -> eyre::Result<B256> {
        let signer = signer_from_key(key)?;
        let from = signer.address();
        let provider = transport.provider()?;

        tx.chain_id = Some(transport.chain_id);
        if tx.from.is_none() {
            tx.from = Some(from);
        }

        // Prefer EIP-1559 fees when the chain supports base fees.
        if tx.gas_price.is_none() && tx.max_fee_per_gas.is_none() {
            let base_fee = provider
                .get_block_by_number(BlockNumberOrTag::Pending)
                .await
                .ok()
                .flatten()
                .and_then(|b| b.header.base_fee_per_gas.map(u128::from));

            let gp = provider.get_gas_price().await.context("get gas price")?;
            tx = apply_fee_policy(tx, base_fee, gp, from, transport.chain_id);
        }

        if tx.nonce.is_none() {
            let n = provider
                .get_transaction_count(from)
                .pending()
                .await
                .context("get nonce")?;
            tx.nonce = Some(n);
        }

        if tx.gas.is_none() {
            let gas = provider
                .estimate_gas(tx.clone())
                .await
                .context("estimate gas")?;
            // Small buffer for flaky estimators.
            let gas = gas.saturating_mul(120) / 100;
            tx.gas = Some(gas);
        }

        let (envelope, tx_hash) = build_and_sign_tx(&signer, &tx).context("sign tx")?;
        let raw_bytes = envelope.encoded_2718();

        match provider.send_raw_transaction(&raw_bytes).await {
            Ok(_pending) => {}
            Err(e) => {
                let ae: eyre::Report = e.into();
                if !broadcast_err_is_ok(&ae) {
                    return Err(ae.wrap_err("broadcast raw tx"));
                }
            }
        }
        debug!(chain = %transport.chain, hash = %tx_hash, "broadcast transaction");
        Ok(tx_hash)
    }

    fn sign_message(&self, key: &[u8], message: &[u8]) -> eyre::Result<Signature> {
        let signer = signer_from_key(key)?;
        signer
            .sign_message_sync(message)
            .context("sign personal message")
    }

    fn sign_typed_data(&self, key: &[u8], typed_data: &TypedData) -> eyre::Result<Signature> {
        let signer = signer_from_key(key)?;
        let hash = typed_data
            .eip712_signing_hash()
            .context("compute eip712 signing hash")?;
        signer.sign_hash_sync(&hash).context("sign typed data")
    }
}
