use crate::errors::KeywardError;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, DurationRound as _, SecondsFormat, TimeDelta, Utc};
use eyre::Context as _;
use zeroize::Zeroizing;

/// Prefix shared by every key-material entry in the secret store.
pub const ACCOUNT_KEY_PREFIX: &str = "account--";

/// One custodied key, identified by its normalized address.
///
/// The encrypted key material itself lives in the secret store under
/// [`Account::storage_key`]; this struct carries only what is needed to find
/// it again. `created_at` is part of the storage key so that re-registration
/// or key rotation never collides with a prior entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Lower-case, `0x`-prefixed hex address.
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(address: &str, created_at: DateTime<Utc>) -> eyre::Result<Self> {
        let address = require_valid_address(address)?;
        // Storage keys carry millisecond precision; truncate up front so a
        // parsed key always matches the record it was derived from.
        let created_at = created_at
            .duration_trunc(TimeDelta::milliseconds(1))
            .unwrap_or(created_at);
        Ok(Self {
            address,
            created_at,
        })
    }

    /// Secret-store key for this account, e.g.
    /// `account--2022-05-24T13:55:47.117Z--2d936b3ada6142b4248de1847c14fa2f4c5b63c3`.
    pub fn storage_key(&self) -> eyre::Result<String> {
        let normalized = require_valid_address(&self.address)?;
        let bare = normalized
            .strip_prefix("0x")
            .unwrap_or(normalized.as_str());
        let ts = self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        Ok(format!("{ACCOUNT_KEY_PREFIX}{ts}--{bare}"))
    }

    /// Inverse of [`Account::storage_key`]. Returns `None` for keys that are
    /// not account entries (wrong prefix or malformed timestamp/address).
    pub fn parse_storage_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(ACCOUNT_KEY_PREFIX)?;
        // The address never contains `-`, so the right-most separator wins.
        let (ts, raw_address) = rest.rsplit_once("--")?;
        if !is_valid_address(raw_address) {
            return None;
        }
        let created_at = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        Some(Self {
            address: normalize_address(raw_address),
            created_at,
        })
    }
}

/// `true` for 40 hex chars, with or without a `0x` prefix.
pub fn is_valid_address(s: &str) -> bool {
    let bare = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    bare.len() == 40 && bare.chars().all(|c| c.is_ascii_hexdigit())
}

/// Lenient normalization used for lookups: lower-case and `0x`-prefixed.
///
/// Never fails; invalid input simply won't match any registered account.
pub fn normalize_address(s: &str) -> String {
    let lower = s.trim().to_ascii_lowercase();
    let bare = lower.strip_prefix("0x").unwrap_or(lower.as_str());
    format!("0x{bare}")
}

/// Strict normalization used wherever an address becomes part of durable
/// state.
pub fn require_valid_address(s: &str) -> Result<String, KeywardError> {
    if !is_valid_address(s) {
        return Err(KeywardError::InvalidAddress(s.to_owned()));
    }
    Ok(normalize_address(s))
}

/// Normalize a secp256k1 private key to lower-case `0x`-prefixed hex.
///
/// Signing with an un-normalized key produces a dramatically different
/// signer, so every key is normalized once on the way in.
pub fn normalize_private_key(s: &str) -> Result<Zeroizing<String>, KeywardError> {
    let trimmed = s.trim();
    let bare = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if bare.len() != 64 || !bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeywardError::InvalidPrivateKey);
    }
    Ok(Zeroizing::new(format!("0x{}", bare.to_ascii_lowercase())))
}

/// Derive the normalized address for a (hex-encoded) private key.
pub fn derive_address(private_key_hex: &str) -> eyre::Result<String> {
    let normalized = normalize_private_key(private_key_hex)?;
    let bare = normalized.strip_prefix("0x").unwrap_or(normalized.as_str());
    let bytes = Zeroizing::new(hex::decode(bare).context("decode private key hex")?);
    let signer = PrivateKeySigner::from_slice(&bytes).context("parse private key")?;
    Ok(format!("0x{}", hex::encode(signer.address().as_slice())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    // Anvil's first well-known dev account.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn storage_key_matches_legacy_format() -> eyre::Result<()> {
        let created_at = DateTime::parse_from_rfc3339("2022-05-24T13:55:47.117Z")?
            .with_timezone(&Utc);
        let account = Account::new("0x2D936B3aDa6142b4248DE1847c14FA2F4c5B63C3", created_at)?;
        assert_eq!(
            account.storage_key()?,
            "account--2022-05-24T13:55:47.117Z--2d936b3ada6142b4248de1847c14fa2f4c5b63c3"
        );
        Ok(())
    }

    #[test]
    fn storage_key_round_trips() -> eyre::Result<()> {
        let account = Account::new(DEV_ADDRESS, Utc::now())?;
        let parsed = Account::parse_storage_key(&account.storage_key()?)
            .context("storage key must parse back")?;
        assert_eq!(parsed.address, account.address);
        assert_eq!(parsed.created_at, account.created_at);
        Ok(())
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        assert!(Account::parse_storage_key("mnemonic--whatever").is_none());
        assert!(Account::parse_storage_key("account--not-a-date--deadbeef").is_none());
    }

    #[test]
    fn address_normalization() {
        assert_eq!(
            normalize_address("2D936B3aDa6142b4248DE1847c14FA2F4c5B63C3"),
            "0x2d936b3ada6142b4248de1847c14fa2f4c5b63c3"
        );
        assert!(is_valid_address(DEV_ADDRESS));
        assert!(!is_valid_address("0x1234"));
        assert!(require_valid_address("nope").is_err());
    }

    #[test]
    fn derive_address_from_known_key() -> eyre::Result<()> {
        assert_eq!(derive_address(DEV_KEY)?, DEV_ADDRESS);
        assert_eq!(derive_address(&format!("0x{DEV_KEY}"))?, DEV_ADDRESS);
        Ok(())
    }

    #[test]
    fn private_key_normalization_rejects_garbage() {
        assert!(normalize_private_key("0x1234").is_err());
        assert!(normalize_private_key("zz").is_err());
    }
}
