//! Client-side mirror of an on-chain derivatives exchange.
//!
//! - [`cache::StateCache`] holds the latest observed exchange state, markets,
//!   oracles and users.
//! - [`subscription::SubscriptionSupervisor`] keeps the cache current through
//!   poll, websocket or log-stream update channels and replaces channels that
//!   stall.
//! - [`remaining_accounts::RemainingAccountResolver`] derives the trailing
//!   accounts an instruction needs from cached positions and markets.
//! - [`client::ExchangeClient`] wires all of the above for one authority.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod remaining_accounts;
pub mod state;
pub mod subscription;

pub use cache::{CacheKey, SlotCache, StateCache};
pub use client::ExchangeClient;
pub use config::{ChannelMode, MirrorConfig};
pub use error::{ErrorInfo, MirrorError};
pub use ledger::{DataAndSlot, LedgerError, LedgerReader, MemcmpFilter};
pub use remaining_accounts::{RemainingAccountParams, RemainingAccountResolver};
