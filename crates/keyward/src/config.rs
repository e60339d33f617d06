use crate::paths::KeywardPaths;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::PathBuf};

/// Default unlock-session length when a caller doesn't pass one explicitly.
pub const DEFAULT_UNLOCK_SECONDS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Unlock-session length (seconds) used by the CLI when `--unlock-seconds`
    /// is omitted. Zero means "until explicitly locked".
    pub default_unlock_seconds: u64,
    pub rpc: RpcConfig,
}

impl Default for KeywardConfig {
    fn default() -> Self {
        Self {
            default_unlock_seconds: DEFAULT_UNLOCK_SECONDS,
            rpc: RpcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary EVM RPC endpoints keyed by chain name.
    pub evm_rpc_urls: BTreeMap<String, String>,
    /// Alternate transports keyed by chain name. Requesting the alternate for
    /// a chain that has none is a hard, distinct failure, never a silent
    /// fallback to the primary.
    pub evm_alternate_rpc_urls: BTreeMap<String, String>,
    /// EVM chain IDs keyed by chain name.
    pub evm_chain_ids: BTreeMap<String, u64>,
}

/// A single EVM chain definition used by the table-driven [`RpcConfig::default()`].
struct EvmChainDef {
    name: &'static str,
    rpc_url: &'static str,
    alternate_rpc_url: Option<&'static str>,
    chain_id: u64,
}

const EVM_CHAINS: &[EvmChainDef] = &[
    EvmChainDef {
        name: "celo",
        rpc_url: "https://forno.celo.org",
        alternate_rpc_url: Some("https://rpc.ankr.com/celo"),
        chain_id: 42220,
    },
    EvmChainDef {
        name: "celo-alfajores",
        rpc_url: "https://alfajores-forno.celo-testnet.org",
        alternate_rpc_url: None,
        chain_id: 44787,
    },
    EvmChainDef {
        name: "ethereum",
        rpc_url: "https://eth.llamarpc.com",
        alternate_rpc_url: Some("https://ethereum-rpc.publicnode.com"),
        chain_id: 1,
    },
    EvmChainDef {
        name: "sepolia",
        rpc_url: "https://rpc.sepolia.org",
        alternate_rpc_url: None,
        chain_id: 11_155_111,
    },
];

impl Default for RpcConfig {
    fn default() -> Self {
        let mut evm_rpc_urls = BTreeMap::new();
        let mut evm_alternate_rpc_urls = BTreeMap::new();
        let mut evm_chain_ids = BTreeMap::new();
        for def in EVM_CHAINS {
            evm_rpc_urls.insert(def.name.into(), def.rpc_url.into());
            evm_chain_ids.insert(def.name.into(), def.chain_id);
            if let Some(alt) = def.alternate_rpc_url {
                evm_alternate_rpc_urls.insert(def.name.into(), alt.into());
            }
        }
        Self {
            evm_rpc_urls,
            evm_alternate_rpc_urls,
            evm_chain_ids,
        }
    }
}

/// Apply environment variable overrides to the config.
fn apply_env_overrides(cfg: &mut KeywardConfig) {
    if let Ok(v) = std::env::var("KEYWARD_DEFAULT_UNLOCK_SECONDS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            cfg.default_unlock_seconds = n;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &KeywardPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<KeywardConfig> {
        if !self.path.exists() {
            let mut cfg = KeywardConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: KeywardConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &KeywardConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_private(&self.path, &s).context("write config.toml")?;
        Ok(())
    }
}
