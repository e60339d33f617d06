//! Local key custody and transaction-signing lock.
//!
//! Keyward stores private key material encrypted at rest, gates every signing
//! operation behind a password-verified, time-boxed unlock session, and
//! exposes a uniform signing surface ([`wallet::Wallet`]) to higher-level
//! flows. Application layers (screens, swap flows, remote signing requests)
//! are consumers of this crate, not part of it.

pub mod account;
pub mod chains;
pub mod config;
pub mod errors;
pub mod fsutil;
pub mod keystore;
pub mod lock;
pub mod paths;
pub mod registry;
pub mod transport;
pub mod wallet;

pub use account::Account;
pub use errors::KeywardError;
pub use lock::LockManager;
pub use registry::AccountRegistry;
pub use transport::{Transport, TransportMode, TransportSelector};
pub use wallet::Wallet;
