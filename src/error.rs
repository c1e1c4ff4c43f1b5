//! Crate-level error model.
//!
//! Layer-specific errors (`LedgerError`, `DecodeError`, `SubscriptionError`)
//! live next to the layer that produces them and convert into `MirrorError`
//! through `#[from]`. Only the explicit load paths and the remaining-account
//! resolver surface errors to callers; background channels absorb theirs.
//!
//! `ErrorInfo` is a lightweight container for attaching context to an error
//! (the failing address, a market label, or a message).

use std::fmt::Display;

use solana_pubkey::Pubkey;
use thiserror::Error;

use crate::{ledger::LedgerError, state::decoder::DecodeError, subscription::SubscriptionError};

/// Context attached to a `MirrorError`.
///
/// - `Pubkey`: a ledger address
/// - `String`: an owned description, e.g. `"perp market 3"`
/// - `StaticStr`: a static description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorInfo {
    Pubkey(Pubkey),
    String(String),
    StaticStr(&'static str),
}

impl From<Pubkey> for ErrorInfo {
    fn from(pubkey: Pubkey) -> Self {
        ErrorInfo::Pubkey(pubkey)
    }
}

impl From<&Pubkey> for ErrorInfo {
    fn from(pubkey: &Pubkey) -> Self {
        ErrorInfo::Pubkey(*pubkey)
    }
}

impl From<String> for ErrorInfo {
    fn from(string: String) -> Self {
        ErrorInfo::String(string)
    }
}

impl From<&'static str> for ErrorInfo {
    fn from(string: &'static str) -> Self {
        ErrorInfo::StaticStr(string)
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorInfo::Pubkey(pubkey) => write!(f, "{}", pubkey),
            ErrorInfo::String(string) => write!(f, "{}", string),
            ErrorInfo::StaticStr(string) => write!(f, "{}", string),
        }
    }
}

/// Errors surfaced by the mirror to its callers.
///
/// **Cache lookups**
/// - `NotLoaded`: the key was never populated. Refresh and retry.
///
/// **Remaining-account resolution**
/// - `MissingDependency`: a market or oracle referenced by a position or
///   override is not cached. The whole resolution fails; attaching an
///   incomplete account list would only make the program reject the
///   instruction.
///
/// **Infrastructure**
/// - `Ledger`, `Subscription`, `Decode` (converted via `#[from]`)
/// - `InvalidConfig`
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The requested record has never been loaded into the cache.
    #[error("Record not loaded: {0}")]
    NotLoaded(ErrorInfo),

    /// A record required to build the remaining-account list is not cached.
    #[error("Missing dependency: {0}")]
    MissingDependency(ErrorInfo),

    /// The configuration could not be parsed or is inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(ErrorInfo),

    /// Error produced by the ledger read layer.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A record failed to decode on an explicit load path.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The initial subscription handshake failed.
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<MirrorError>();
};
