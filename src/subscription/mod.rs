//! Update channels and their supervision.
//!
//! An [`UpdateChannel`] turns one watched filter into a stream of raw account
//! updates. Three variants exist:
//!
//! - [`polling::PollingChannel`]: re-reads the filter on a fixed interval.
//!   Self-driven, so it never stalls.
//! - [`websocket::WebSocketChannel`]: account/program push subscriptions.
//! - [`logs::LogStreamChannel`]: program log notifications, each of which
//!   triggers a re-read of the filter.
//!
//! The [`supervisor::SubscriptionSupervisor`] owns one channel per
//! [`WatchKey`], decodes what it delivers into the state cache and replaces
//! channels that go silent.

pub mod logs;
pub mod polling;
pub mod supervisor;
pub mod websocket;

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use solana_client::nonblocking::pubsub_client::PubsubClientError;
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;
use thiserror::Error;

use crate::{
    config::ChannelMode,
    ledger::{DataAndSlot, LedgerError, LedgerReader, MemcmpFilter},
    state::RecordKind,
};

pub use supervisor::{EventCallback, RecordEvent, SubscriptionState, SubscriptionSupervisor, SupervisorConfig};

/// One account update as delivered by a channel, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUpdate {
    pub address: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// What a channel reports to whoever started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Update(RawUpdate),
    /// The channel is alive but has nothing new to deliver.
    Heartbeat,
    /// The underlying stream ended; the channel will deliver nothing more.
    Closed,
}

pub type UpdateCallback = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Which accounts a channel watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchFilter {
    Account(Pubkey),
    Accounts(Vec<Pubkey>),
    /// Every program account matching all memcmp filters.
    Program(Vec<MemcmpFilter>),
}

/// A watched (record kind, filter) pair. The supervisor runs at most one
/// channel per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub kind: RecordKind,
    pub filter: WatchFilter,
}

impl WatchKey {
    pub fn new(kind: RecordKind, filter: WatchFilter) -> Self {
        Self { kind, filter }
    }
}

impl std::fmt::Display for WatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.filter {
            WatchFilter::Account(address) => write!(f, "{:?}@{}", self.kind, address),
            WatchFilter::Accounts(addresses) => write!(f, "{:?}@[{} accounts]", self.kind, addresses.len()),
            WatchFilter::Program(filters) => write!(f, "{:?}@program[{} filters]", self.kind, filters.len()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("pubsub error: {0}")]
    Pubsub(#[from] PubsubClientError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{0} channel task ended before confirming the subscription")]
    ChannelClosed(&'static str),

    #[error("subscription to {0} did not become active")]
    NotActive(String),
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SubscriptionError>();
};

/// A source of raw account updates for one watch filter.
///
/// `start` returns once the channel is live (handshake done, or first read
/// served) and from then on calls `on_update` from a background task, in the
/// order updates were received. A channel that hears from the ledger without
/// having a changed account to deliver sends `ChannelEvent::Heartbeat`; one
/// whose stream ends sends `ChannelEvent::Closed`. `stop` must be idempotent
/// and must not return while the background task can still call `on_update`.
#[async_trait]
pub trait UpdateChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether silence on this channel means it is broken.
    fn can_stall(&self) -> bool {
        true
    }

    async fn start(&mut self, on_update: UpdateCallback) -> Result<(), SubscriptionError>;

    async fn stop(&mut self);
}

/// Builds the channel for a watch key. The supervisor calls it on every
/// subscribe and resubscribe.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, key: &WatchKey) -> Box<dyn UpdateChannel>;
}

/// Builds ledger-backed channels according to a [`ChannelMode`].
pub struct LedgerChannelFactory {
    reader: Arc<dyn LedgerReader>,
    ws_url: String,
    commitment: CommitmentConfig,
    mode: ChannelMode,
}

impl LedgerChannelFactory {
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        ws_url: impl Into<String>,
        commitment: CommitmentConfig,
        mode: ChannelMode,
    ) -> Self {
        Self {
            reader,
            ws_url: ws_url.into(),
            commitment,
            mode,
        }
    }
}

impl ChannelFactory for LedgerChannelFactory {
    fn create(&self, key: &WatchKey) -> Box<dyn UpdateChannel> {
        match &self.mode {
            ChannelMode::Polling { frequency_ms } => Box::new(polling::PollingChannel::new(
                self.reader.clone(),
                key.filter.clone(),
                Duration::from_millis(*frequency_ms),
            )),
            ChannelMode::Websocket => Box::new(websocket::WebSocketChannel::new(
                self.ws_url.clone(),
                self.reader.program_id(),
                key.filter.clone(),
                self.commitment,
            )),
            ChannelMode::Logs => Box::new(logs::LogStreamChannel::new(
                self.ws_url.clone(),
                self.reader.clone(),
                key.filter.clone(),
                self.commitment,
            )),
        }
    }
}

/// Read every account currently matching `filter`. Missing accounts are
/// omitted.
pub(crate) async fn read_filter(
    reader: &dyn LedgerReader,
    filter: &WatchFilter,
) -> Result<DataAndSlot<Vec<(Pubkey, Vec<u8>)>>, LedgerError> {
    match filter {
        WatchFilter::Account(address) => {
            let response = reader.get_account(address).await?;
            Ok(response.map(|account| {
                account
                    .map(|account| vec![(*address, account.data)])
                    .unwrap_or_default()
            }))
        }
        WatchFilter::Accounts(addresses) => {
            let response = reader.get_multiple_accounts(addresses).await?;
            Ok(response.map(|accounts| {
                addresses
                    .iter()
                    .zip(accounts)
                    .filter_map(|(address, account)| account.map(|account| (*address, account.data)))
                    .collect()
            }))
        }
        WatchFilter::Program(filters) => {
            let response = reader.get_program_accounts(filters).await?;
            Ok(response.map(|accounts| {
                accounts
                    .into_iter()
                    .map(|(address, account)| (address, account.data))
                    .collect()
            }))
        }
    }
}

/// Remembers the last bytes seen per address so re-reads only emit changes.
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    last_seen: AHashMap<Pubkey, (u64, Vec<u8>)>,
}

impl ChangeTracker {
    /// Emit every account whose bytes differ from the last emission. Reads
    /// served at an older slot than the last emission are dropped.
    pub(crate) fn emit_changed(
        &mut self,
        read: DataAndSlot<Vec<(Pubkey, Vec<u8>)>>,
        on_update: &UpdateCallback,
    ) -> usize {
        let mut emitted = 0;
        for (address, data) in read.data {
            if let Some((slot, previous)) = self.last_seen.get(&address) {
                if read.slot < *slot || *previous == data {
                    continue;
                }
            }

            self.last_seen.insert(address, (read.slot, data.clone()));
            on_update(ChannelEvent::Update(RawUpdate {
                address,
                data,
                slot: read.slot,
            }));
            emitted += 1;
        }
        emitted
    }
}
