//! Lifecycle management for watched (record kind, filter) pairs.
//!
//! Each pair moves through
//! `Unsubscribed -> Subscribing -> Active -> (Stalled -> Resubscribing -> Active) -> Unsubscribed`.
//! Every delivery is decoded, written to the [`StateCache`] and then handed to
//! the caller's callback, all while holding the pair's delivery gate shared.
//! `unsubscribe` closes the gate exclusively, so once it returns nothing more
//! is written for that pair.
//!
//! Heartbeats count as activity without touching the cache. A channel that
//! reports its stream closed is replaced straight away, whether or not stall
//! detection is on.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use solana_pubkey::Pubkey;
use tokio::{sync::Notify, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::StateCache,
    error::MirrorError,
    state::{Record, RecordKind},
    subscription::{
        ChannelEvent, ChannelFactory, RawUpdate, SubscriptionError, UpdateCallback, UpdateChannel, WatchFilter,
        WatchKey,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Stalled,
    Resubscribing,
}

/// A decoded update, as stored in the cache.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub address: Pubkey,
    pub record: Record,
    pub slot: u64,
}

pub type EventCallback = Arc<dyn Fn(&RecordEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Silence longer than this marks a channel stalled. `None` disables stall
    /// detection.
    pub resub_timeout: Option<Duration>,
    pub check_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            resub_timeout: None,
            check_interval: Duration::from_secs(1),
        }
    }
}

struct PairHealth {
    state: Mutex<SubscriptionState>,
    /// Delivery gate. Read-locked for every delivery, write-locked to close.
    open: RwLock<bool>,
    last_event: Mutex<Instant>,
    consecutive_resubscriptions: AtomicU64,
    total_resubscriptions: AtomicU64,
    /// Woken when the running channel reports its stream closed.
    closed: Notify,
}

impl PairHealth {
    fn new() -> Self {
        Self {
            state: Mutex::new(SubscriptionState::Subscribing),
            open: RwLock::new(true),
            last_event: Mutex::new(Instant::now()),
            consecutive_resubscriptions: AtomicU64::new(0),
            total_resubscriptions: AtomicU64::new(0),
            closed: Notify::new(),
        }
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock() = state;
    }

    fn record_event(&self) {
        *self.last_event.lock() = Instant::now();
        self.consecutive_resubscriptions.store(0, Ordering::Relaxed);

        let mut state = self.state.lock();
        if matches!(
            *state,
            SubscriptionState::Subscribing | SubscriptionState::Stalled | SubscriptionState::Resubscribing
        ) {
            *state = SubscriptionState::Active;
        }
    }

    fn record_closed(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, SubscriptionState::Subscribing | SubscriptionState::Active) {
                *state = SubscriptionState::Stalled;
            }
        }
        self.closed.notify_one();
    }

    fn silent_for(&self) -> Duration {
        self.last_event.lock().elapsed()
    }

    fn close(&self) {
        *self.open.write() = false;
        self.set_state(SubscriptionState::Unsubscribed);
    }
}

struct WatchedPair {
    key: WatchKey,
    on_event: Option<EventCallback>,
    channel: tokio::sync::Mutex<Option<Box<dyn UpdateChannel>>>,
    cancel: CancellationToken,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    health: Arc<PairHealth>,
}

impl WatchedPair {
    fn new(key: WatchKey, on_event: Option<EventCallback>) -> Self {
        Self {
            key,
            on_event,
            channel: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            watchdog: Mutex::new(None),
            health: Arc::new(PairHealth::new()),
        }
    }

    /// Build the callback handed to a channel. It captures the health record
    /// rather than the pair so the channel does not keep the pair alive.
    fn delivery_callback(&self, cache: Arc<StateCache>) -> UpdateCallback {
        let health = self.health.clone();
        let kind = self.key.kind;
        let on_event = self.on_event.clone();

        Arc::new(move |event: ChannelEvent| {
            let open = health.open.read();
            if !*open {
                return;
            }

            let update: RawUpdate = match event {
                ChannelEvent::Update(update) => update,
                ChannelEvent::Heartbeat => {
                    health.record_event();
                    return;
                }
                ChannelEvent::Closed => {
                    health.record_closed();
                    return;
                }
            };
            health.record_event();

            let record = match cache.decoder().decode(kind, &update.data) {
                Ok(record) => record,
                Err(err) => {
                    warn!("dropping undecodable {:?} update for {}: {}", kind, update.address, err);
                    return;
                }
            };

            cache.put(update.address, record.clone(), update.slot);

            if let Some(on_event) = &on_event {
                on_event(&RecordEvent {
                    address: update.address,
                    record,
                    slot: update.slot,
                });
            }
        })
    }

    /// Tear down the current channel and start a fresh one with the same
    /// filter. Returns whether the replacement is live.
    async fn resubscribe(&self, factory: &dyn ChannelFactory, cache: &Arc<StateCache>) -> bool {
        let mut slot = self.channel.lock().await;
        if self.cancel.is_cancelled() {
            return false;
        }

        self.health.set_state(SubscriptionState::Resubscribing);
        let attempt = self.health.consecutive_resubscriptions.fetch_add(1, Ordering::Relaxed) + 1;
        self.health.total_resubscriptions.fetch_add(1, Ordering::Relaxed);

        if let Some(mut old) = slot.take() {
            old.stop().await;
        }

        let mut channel = factory.create(&self.key);
        match channel.start(self.delivery_callback(cache.clone())).await {
            Ok(()) => {
                info!("resubscribed {} via {} (attempt {})", self.key, channel.name(), attempt);
                *self.health.last_event.lock() = Instant::now();
                {
                    // A close reported during the handshake leaves the pair stalled.
                    let mut state = self.health.state.lock();
                    if *state == SubscriptionState::Resubscribing && !self.cancel.is_cancelled() {
                        *state = SubscriptionState::Active;
                    }
                }
                *slot = Some(channel);
                true
            }
            Err(err) => {
                error!("resubscribe of {} failed (attempt {}): {}", self.key, attempt, err);
                false
            }
        }
    }
}

async fn watchdog(
    pair: Arc<WatchedPair>,
    factory: Arc<dyn ChannelFactory>,
    cache: Arc<StateCache>,
    stall_timeout: Option<Duration>,
    check_interval: Duration,
) {
    let mut interval = tokio::time::interval(check_interval);
    loop {
        tokio::select! {
            _ = pair.cancel.cancelled() => break,
            _ = pair.health.closed.notified() => {}
            _ = interval.tick() => {}
        }

        match pair.health.state() {
            SubscriptionState::Active => {
                let Some(resub_timeout) = stall_timeout else {
                    continue;
                };
                let silent_for = pair.health.silent_for();
                if silent_for <= resub_timeout {
                    continue;
                }
                warn!("{} stalled: no update for {:?}", pair.key, silent_for);
                pair.health.set_state(SubscriptionState::Stalled);
            }
            // Closed, or a previous attempt failed; keep retrying.
            SubscriptionState::Stalled | SubscriptionState::Resubscribing => {}
            SubscriptionState::Subscribing | SubscriptionState::Unsubscribed => continue,
        }

        // Not raced against cancellation: a half-started channel must be
        // stored so that teardown can stop it.
        pair.resubscribe(factory.as_ref(), &cache).await;
    }
    debug!("watchdog for {} exiting", pair.key);
}

/// Owns one update channel per watched pair.
pub struct SubscriptionSupervisor {
    cache: Arc<StateCache>,
    factory: Arc<dyn ChannelFactory>,
    config: SupervisorConfig,
    pairs: Mutex<AHashMap<WatchKey, Arc<WatchedPair>>>,
}

impl SubscriptionSupervisor {
    pub fn new(cache: Arc<StateCache>, factory: Arc<dyn ChannelFactory>, config: SupervisorConfig) -> Self {
        Self {
            cache,
            factory,
            config,
            pairs: Mutex::new(AHashMap::default()),
        }
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// Start watching `filter` for records of `kind`.
    ///
    /// Returns once the channel has confirmed its handshake; a handshake
    /// failure is returned and leaves the pair unsubscribed. When the pair is
    /// already subscribed this does not open another channel. If another
    /// caller's handshake for the same pair is still in flight, it waits for
    /// that handshake and reports `SubscriptionError::NotActive` when it
    /// failed.
    pub async fn subscribe(
        &self,
        kind: RecordKind,
        filter: WatchFilter,
        on_event: Option<EventCallback>,
    ) -> Result<(), MirrorError> {
        let key = WatchKey::new(kind, filter);
        let (pair, existing) = {
            let mut pairs = self.pairs.lock();
            match pairs.get(&key) {
                Some(pair) => (pair.clone(), true),
                None => {
                    let pair = Arc::new(WatchedPair::new(key.clone(), on_event));
                    pairs.insert(key, pair.clone());
                    (pair, false)
                }
            }
        };

        if existing {
            let slot = pair.channel.lock().await;
            if slot.is_none() && pair.cancel.is_cancelled() {
                return Err(SubscriptionError::NotActive(pair.key.to_string()).into());
            }
            debug!("{} already subscribed", pair.key);
            return Ok(());
        }

        let mut slot = pair.channel.lock().await;
        if pair.cancel.is_cancelled() {
            return Ok(());
        }

        let mut channel = self.factory.create(&pair.key);
        if let Err(err) = channel.start(pair.delivery_callback(self.cache.clone())).await {
            // Cancel before releasing the slot so waiting subscribers see the failure.
            pair.cancel.cancel();
            pair.health.close();
            drop(slot);
            let mut pairs = self.pairs.lock();
            if pairs.get(&pair.key).is_some_and(|current| Arc::ptr_eq(current, &pair)) {
                pairs.remove(&pair.key);
            }
            warn!("subscribe to {} failed: {}", pair.key, err);
            return Err(err.into());
        }

        info!("subscribed {} via {}", pair.key, channel.name());
        let can_stall = channel.can_stall();
        {
            let mut state = pair.health.state.lock();
            if *state == SubscriptionState::Subscribing {
                *state = SubscriptionState::Active;
            }
        }
        *pair.health.last_event.lock() = Instant::now();
        *slot = Some(channel);

        let stall_timeout = self.config.resub_timeout.filter(|_| can_stall);
        let handle = tokio::spawn(watchdog(
            pair.clone(),
            self.factory.clone(),
            self.cache.clone(),
            stall_timeout,
            self.config.check_interval,
        ));
        *pair.watchdog.lock() = Some(handle);

        Ok(())
    }

    /// Stop watching the pair. A no-op when it is not subscribed. Once this
    /// returns no further cache write or callback happens for the pair.
    pub async fn unsubscribe(&self, kind: RecordKind, filter: WatchFilter) {
        let key = WatchKey::new(kind, filter);
        let Some(pair) = self.pairs.lock().remove(&key) else {
            debug!("{} not subscribed", key);
            return;
        };
        self.teardown(pair).await;
    }

    async fn teardown(&self, pair: Arc<WatchedPair>) {
        pair.cancel.cancel();
        pair.health.close();

        let channel = pair.channel.lock().await.take();
        if let Some(mut channel) = channel {
            channel.stop().await;
        }

        let watchdog = pair.watchdog.lock().take();
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }

        info!("unsubscribed {}", pair.key);
    }

    pub async fn unsubscribe_all(&self) {
        let pairs: Vec<Arc<WatchedPair>> = self.pairs.lock().drain().map(|(_, pair)| pair).collect();
        for pair in pairs {
            self.teardown(pair).await;
        }
    }

    pub fn state(&self, kind: RecordKind, filter: WatchFilter) -> SubscriptionState {
        self.pairs
            .lock()
            .get(&WatchKey::new(kind, filter))
            .map_or(SubscriptionState::Unsubscribed, |pair| pair.health.state())
    }

    /// Resubscriptions since the pair last delivered an event.
    pub fn resubscription_count(&self, kind: RecordKind, filter: WatchFilter) -> u64 {
        self.pairs
            .lock()
            .get(&WatchKey::new(kind, filter))
            .map_or(0, |pair| pair.health.consecutive_resubscriptions.load(Ordering::Relaxed))
    }

    pub fn total_resubscriptions(&self, kind: RecordKind, filter: WatchFilter) -> u64 {
        self.pairs
            .lock()
            .get(&WatchKey::new(kind, filter))
            .map_or(0, |pair| pair.health.total_resubscriptions.load(Ordering::Relaxed))
    }

    /// Number of pairs currently subscribed, in any state but `Unsubscribed`.
    pub fn active_count(&self) -> usize {
        self.pairs.lock().len()
    }
}
