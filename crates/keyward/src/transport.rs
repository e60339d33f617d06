use crate::{config::KeywardConfig, errors::KeywardError};
use alloy::providers::RootProvider;
use eyre::Context as _;
use reqwest::Client;
use std::{collections::BTreeMap, time::Duration};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type EvmProvider = RootProvider;

/// Which of a chain's configured transports to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Default,
    Alternate,
}

/// One configured network channel for a chain. Opaque to callers: it is
/// handed straight to the signer, which builds a provider from it on demand.
#[derive(Debug, Clone)]
pub struct Transport {
    pub chain: String,
    pub chain_id: u64,
    pub url: String,
    pub mode: TransportMode,
}

impl Transport {
    pub fn provider(&self) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = self
            .url
            .parse()
            .with_context(|| format!("invalid rpc url: {}", self.url))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }
}

struct ChainTransports {
    default: Transport,
    alternate: Option<Transport>,
}

/// Pure (chain, mode) → transport lookup.
///
/// Strict on misses: an unknown chain and a missing alternate fail with
/// distinct errors so callers can't accidentally broadcast over the wrong
/// channel.
pub struct TransportSelector {
    entries: BTreeMap<String, ChainTransports>,
}

impl TransportSelector {
    pub fn from_config(cfg: &KeywardConfig) -> Self {
        let mut entries = BTreeMap::new();
        for (chain, url) in &cfg.rpc.evm_rpc_urls {
            let Some(&chain_id) = cfg.rpc.evm_chain_ids.get(chain) else {
                // A chain without an id can't be signed for; skip it rather
                // than guessing.
                continue;
            };
            let default = Transport {
                chain: chain.clone(),
                chain_id,
                url: url.clone(),
                mode: TransportMode::Default,
            };
            let alternate = cfg
                .rpc
                .evm_alternate_rpc_urls
                .get(chain)
                .map(|alt| Transport {
                    chain: chain.clone(),
                    chain_id,
                    url: alt.clone(),
                    mode: TransportMode::Alternate,
                });
            entries.insert(chain.clone(), ChainTransports { default, alternate });
        }
        Self { entries }
    }

    pub fn get_transport(
        &self,
        chain: &str,
        mode: TransportMode,
    ) -> Result<&Transport, KeywardError> {
        let entry = self
            .entries
            .get(chain)
            .ok_or_else(|| KeywardError::UnsupportedChain(chain.to_owned()))?;
        match mode {
            TransportMode::Default => Ok(&entry.default),
            TransportMode::Alternate => entry
                .alternate
                .as_ref()
                .ok_or_else(|| KeywardError::UnsupportedTransport(chain.to_owned())),
        }
    }

    pub fn chains(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chain_and_missing_alternate_fail_distinctly() -> eyre::Result<()> {
        let selector = TransportSelector::from_config(&KeywardConfig::default());

        let t = selector.get_transport("celo", TransportMode::Default)?;
        assert_eq!(t.chain_id, 42220);

        let alt = selector.get_transport("celo", TransportMode::Alternate)?;
        assert_eq!(alt.mode, TransportMode::Alternate);
        assert_ne!(alt.url, t.url);

        let missing = selector.get_transport("dogecoin", TransportMode::Default);
        assert!(matches!(missing, Err(KeywardError::UnsupportedChain(c)) if c == "dogecoin"));

        // Sepolia is configured but has no alternate: the failure must be
        // distinguishable from the unknown-chain case.
        let no_alt = selector.get_transport("sepolia", TransportMode::Alternate);
        assert!(matches!(no_alt, Err(KeywardError::UnsupportedTransport(c)) if c == "sepolia"));
        Ok(())
    }

    #[test]
    fn chains_without_ids_are_skipped() {
        let mut cfg = KeywardConfig::default();
        cfg.rpc
            .evm_rpc_urls
            .insert("mystery".to_owned(), "https://example.invalid".to_owned());
        let selector = TransportSelector::from_config(&cfg);
        assert!(matches!(
            selector.get_transport("mystery", TransportMode::Default),
            Err(KeywardError::UnsupportedChain(_))
        ));
    }
}
