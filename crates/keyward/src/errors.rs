use thiserror::Error;

/// Domain errors surfaced to consumers of the signing surface.
///
/// Wrong-password outcomes are deliberately NOT errors: `unlock_account` and
/// `update_account` report them as `Ok(false)` so retry loops stay plain.
#[derive(Debug, Error, Clone)]
pub enum KeywardError {
    #[error("account already exists")]
    AccountAlreadyExists,

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("invalid account address: {0}")]
    InvalidAddress(String),

    #[error("invalid private key")]
    InvalidPrivateKey,

    /// The stable authentication-gate error. Consumers pattern-match this
    /// message to decide when to show a password prompt, so the text must not
    /// change.
    #[error("authentication needed: password or unlock")]
    AuthenticationRequired,

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("no alternate transport configured for chain: {0}")]
    UnsupportedTransport(String),

    /// Memoized failure of the one-shot account load. Every caller after the
    /// first observes the same original failure text.
    #[error("account store initialization failed: {0}")]
    InitializationFailure(String),

    #[error("secret store busy")]
    StoreBusy,
}
