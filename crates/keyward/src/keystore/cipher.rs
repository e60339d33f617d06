use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::Engine as _;
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// A private-key payload sealed under a password-derived key.
///
/// The KDF salt is per-blob: rotating the password re-seals with a fresh salt
/// so old derived keys become useless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedKey {
    pub v: u8,
    pub kdf_salt_b64: String,
    pub nonce_b64: String,
    pub ct_b64: String,
}

/// Failures opening a [`SealedKey`].
///
/// `WrongPassword` is an expected, recoverable outcome (the AEAD tag check
/// failed); everything else means the blob itself is damaged.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("wrong password")]
    WrongPassword,

    #[error("malformed sealed key: {0}")]
    Malformed(String),
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt16() -> [u8; 16] {
    let mut s = [0_u8; 16];
    fill_random(&mut s);
    s
}

/// Derive the 32-byte wrapping key for a password + salt.
///
/// Argon2id parameters are frozen to avoid accidental changes across
/// dependency updates. These match `argon2::Params::DEFAULT` in argon2 0.5.x.
pub fn derive_wrap_key(
    password: &SecretString,
    salt16: &[u8; 16],
) -> eyre::Result<Zeroizing<[u8; 32]>> {
    let params =
        Params::new(19 * 1024, 2, 1, Some(32)).map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(salt16).map_err(|e| eyre::eyre!("encode salt: {e}"))?;

    // We use a PHC hash but only take the raw bytes; this keeps parameters versioned.
    let hash = argon2
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
    let bytes = hash
        .hash
        .ok_or_else(|| eyre::eyre!("argon2 missing hash"))?;
    let raw = bytes.as_bytes();
    let Some(master) = raw.get(..32) else {
        eyre::bail!("argon2 hash too short");
    };

    // Domain-separate the stretched secret so the wrapping key can never be
    // confused with keys derived for other purposes.
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut out = Zeroizing::new([0_u8; 32]);
    hk.expand(b"keyward:wrap:v1", out.as_mut_slice())
        .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
    Ok(out)
}

/// Seal `plaintext` under an already-derived wrapping key, recording the salt
/// that key was derived with.
pub fn seal_with_key(
    plaintext: &[u8],
    key32: &[u8; 32],
    kdf_salt16: &[u8; 16],
) -> eyre::Result<SealedKey> {
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let mut nonce = [0_u8; 12];
    fill_random(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

    Ok(SealedKey {
        v: 1,
        kdf_salt_b64: base64::engine::general_purpose::STANDARD.encode(kdf_salt16),
        nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce),
        ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
    })
}

/// Seal `plaintext` under `password` with a fresh random salt.
pub fn seal(plaintext: &[u8], password: &SecretString) -> eyre::Result<SealedKey> {
    let salt = random_salt16();
    let key = derive_wrap_key(password, &salt)?;
    seal_with_key(plaintext, &key, &salt)
}

impl SealedKey {
    pub fn kdf_salt(&self) -> Result<[u8; 16], CipherError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.kdf_salt_b64)
            .map_err(|e| CipherError::Malformed(format!("decode kdf salt: {e}")))?;
        let mut out = [0_u8; 16];
        if bytes.len() != 16 {
            return Err(CipherError::Malformed("kdf salt must be 16 bytes".into()));
        }
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

/// Open a sealed blob with an already-derived wrapping key.
pub fn open_with_key(
    sealed: &SealedKey,
    key32: &[u8; 32],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if sealed.v != 1 {
        return Err(CipherError::Malformed(format!(
            "unsupported sealed key version: {}",
            sealed.v
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key32)
        .map_err(|e| CipherError::Malformed(format!("aes init: {e}")))?;
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(&sealed.nonce_b64)
        .map_err(|e| CipherError::Malformed(format!("decode nonce: {e}")))?;
    if nonce.len() != 12 {
        return Err(CipherError::Malformed("invalid nonce length".into()));
    }
    let ct = base64::engine::general_purpose::STANDARD
        .decode(&sealed.ct_b64)
        .map_err(|e| CipherError::Malformed(format!("decode ciphertext: {e}")))?;

    // AEAD failure is indistinguishable between a wrong key and a tampered
    // blob; we report the common case.
    let pt = cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map_err(|_aead_opaque| CipherError::WrongPassword)?;
    Ok(Zeroizing::new(pt))
}

/// Open a sealed blob with a password, deriving the wrapping key from the
/// blob's own salt.
pub fn open(sealed: &SealedKey, password: &SecretString) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let salt = sealed.kdf_salt()?;
    let key = derive_wrap_key(password, &salt)
        .map_err(|e| CipherError::Malformed(format!("derive key: {e}")))?;
    open_with_key(sealed, &key)
}
