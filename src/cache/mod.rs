//! In-memory mirror of the exchange program's accounts.
//!
//! `StateCache` holds the most recently observed value of every watched
//! record. It is written by update channels (through the subscription
//! supervisor) and by explicit loads, and read synchronously by the
//! remaining-account resolver and any caller building instructions.
//!
//! Storage is one `DashMap` per record kind, so single-key writes from
//! different channels and reads from instruction builders never contend on a
//! global lock. There is no cross-kind snapshot: a market may be updated
//! before or after the oracle it points at, and readers must treat a missing
//! dependency as a failed lookup.

pub mod slot_cache;

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::RwLock;
use solana_pubkey::Pubkey;

use crate::{
    error::{ErrorInfo, MirrorError},
    ledger::{DataAndSlot, LedgerReader, MemcmpFilter},
    state::{
        ExchangeState, MarketType, PerpMarket, Record, RecordKind, SpotMarket, UserAccount, UserKey,
        addresses::{perp_market_address, spot_market_address, state_address, user_address},
        decoder::{AccountDiscriminator, RecordDecoder},
        oracle::{ORACLE_DEFAULT_KEY, OraclePriceData, OracleSource, QUOTE_ORACLE_PRICE_DATA},
    },
};

pub use slot_cache::SlotCache;

/// Logical key of a cached record.
///
/// Oracles are stored by address alone; the source is only needed to decode
/// the account when it is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    State,
    PerpMarket(u16),
    SpotMarket(u16),
    User(UserKey),
    Oracle { address: Pubkey, source: OracleSource },
}

impl CacheKey {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            CacheKey::State => RecordKind::State,
            CacheKey::PerpMarket(_) => RecordKind::PerpMarket,
            CacheKey::SpotMarket(_) => RecordKind::SpotMarket,
            CacheKey::User(_) => RecordKind::User,
            CacheKey::Oracle { source, .. } => RecordKind::Oracle(*source),
        }
    }

    /// Ledger address backing this key.
    pub fn address(&self, program_id: &Pubkey) -> Pubkey {
        match self {
            CacheKey::State => state_address(program_id),
            CacheKey::PerpMarket(index) => perp_market_address(program_id, *index),
            CacheKey::SpotMarket(index) => spot_market_address(program_id, *index),
            CacheKey::User(key) => user_address(program_id, &key.authority, key.sub_account_id),
            CacheKey::Oracle { address, .. } => *address,
        }
    }
}

pub struct StateCache {
    reader: Arc<dyn LedgerReader>,
    decoder: Arc<dyn RecordDecoder>,
    state: RwLock<Option<DataAndSlot<ExchangeState>>>,
    perp_markets: DashMap<u16, DataAndSlot<PerpMarket>>,
    spot_markets: DashMap<u16, DataAndSlot<SpotMarket>>,
    market_addresses: DashMap<Pubkey, (MarketType, u16)>,
    oracles: DashMap<Pubkey, DataAndSlot<OraclePriceData>>,
    users: DashMap<UserKey, DataAndSlot<UserAccount>>,
    slot_cache: SlotCache,
}

impl StateCache {
    pub fn new(reader: Arc<dyn LedgerReader>, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self {
            reader,
            decoder,
            state: RwLock::new(None),
            perp_markets: DashMap::new(),
            spot_markets: DashMap::new(),
            market_addresses: DashMap::new(),
            oracles: DashMap::new(),
            users: DashMap::new(),
            slot_cache: SlotCache::new(),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.reader.program_id()
    }

    pub fn decoder(&self) -> &Arc<dyn RecordDecoder> {
        &self.decoder
    }

    pub fn reader(&self) -> &Arc<dyn LedgerReader> {
        &self.reader
    }

    pub fn slot_cache(&self) -> &SlotCache {
        &self.slot_cache
    }

    /// Return whatever is currently held for `key`, which may be stale.
    pub fn get(&self, key: &CacheKey) -> Option<Record> {
        self.get_with_slot(key).map(|entry| entry.data)
    }

    pub fn get_with_slot(&self, key: &CacheKey) -> Option<DataAndSlot<Record>> {
        match key {
            CacheKey::State => self.state.read().as_ref().cloned().map(|s| s.map(Record::State)),
            CacheKey::PerpMarket(index) => self
                .perp_markets
                .get(index)
                .map(|m| m.value().clone().map(Record::PerpMarket)),
            CacheKey::SpotMarket(index) => self
                .spot_markets
                .get(index)
                .map(|m| m.value().clone().map(Record::SpotMarket)),
            CacheKey::User(user_key) => self.users.get(user_key).map(|u| u.value().clone().map(Record::User)),
            CacheKey::Oracle { address, .. } => self
                .oracle_with_slot(address)
                .map(|o| o.map(Record::Oracle)),
        }
    }

    /// Store `record`, observed at `slot` under ledger `address`, replacing any
    /// previous value for the same key.
    pub fn put(&self, address: Pubkey, record: Record, slot: u64) {
        match record {
            Record::State(state) => {
                *self.state.write() = Some(DataAndSlot::new(state, slot));
            }
            Record::PerpMarket(market) => {
                let index = market.market_index;
                self.perp_markets.insert(index, DataAndSlot::new(market, slot));
                self.market_addresses.insert(address, (MarketType::Perp, index));
            }
            Record::SpotMarket(market) => {
                let index = market.market_index;
                self.spot_markets.insert(index, DataAndSlot::new(market, slot));
                self.market_addresses.insert(address, (MarketType::Spot, index));
            }
            Record::User(user) => {
                self.users.insert(user.key(), DataAndSlot::new(user, slot));
            }
            Record::Oracle(price) => {
                self.oracles.insert(address, DataAndSlot::new(price, slot));
            }
        }
    }

    /// Read `key` from the ledger now, decode it and store it.
    ///
    /// Returns `None` when the account does not exist, cannot be decoded or
    /// the read failed; the latter two are logged so the next refresh can
    /// retry without taking the cache down.
    pub async fn fetch_now(&self, key: &CacheKey) -> Option<Record> {
        if let CacheKey::Oracle { address, .. } = key {
            if *address == ORACLE_DEFAULT_KEY {
                return Some(Record::Oracle(QUOTE_ORACLE_PRICE_DATA));
            }
        }

        let address = key.address(&self.program_id());
        let response = match self.reader.get_account(&address).await {
            Ok(response) => response,
            Err(err) => {
                warn!("failed to fetch {:?} at {}: {}", key, address, err);
                return None;
            }
        };

        let Some(account) = response.data else {
            debug!("{:?} at {} does not exist", key, address);
            return None;
        };

        match self.decoder.decode(key.record_kind(), &account.data) {
            Ok(record) => {
                self.put(address, record.clone(), response.slot);
                Some(record)
            }
            Err(err) => {
                warn!("failed to decode {:?} at {}: {}", key, address, err);
                None
            }
        }
    }

    /// Fetch several keys in one batched read. Keys that are absent or fail
    /// to decode are skipped. Returns how many records were stored.
    pub async fn fetch_many(&self, keys: &[CacheKey]) -> Result<usize, MirrorError> {
        let program_id = self.program_id();
        let keys: Vec<&CacheKey> = keys
            .iter()
            .filter(|key| !matches!(key, CacheKey::Oracle { address, .. } if *address == ORACLE_DEFAULT_KEY))
            .collect();
        let addresses: Vec<Pubkey> = keys.iter().map(|key| key.address(&program_id)).collect();

        let response = self.reader.get_multiple_accounts(&addresses).await?;

        let mut stored = 0;
        for ((key, address), account) in keys.iter().zip(addresses.iter()).zip(response.data.iter()) {
            let Some(account) = account else {
                debug!("{:?} at {} does not exist", key, address);
                continue;
            };
            match self.decoder.decode(key.record_kind(), &account.data) {
                Ok(record) => {
                    self.put(*address, record, response.slot);
                    stored += 1;
                }
                Err(err) => warn!("failed to decode {:?} at {}: {}", key, address, err),
            }
        }

        Ok(stored)
    }

    /// Scan every program account of type `T` and store the decodable ones.
    /// Returns how many records were stored.
    pub async fn load_all<T: AccountDiscriminator>(&self, kind: RecordKind) -> Result<usize, MirrorError> {
        let filters = [MemcmpFilter::new(0, T::discriminator())];
        let response = self.reader.get_program_accounts(&filters).await?;

        let mut stored = 0;
        for (address, account) in response.data.iter() {
            match self.decoder.decode(kind, &account.data) {
                Ok(record) => {
                    self.put(*address, record, response.slot);
                    stored += 1;
                }
                Err(err) => warn!("failed to decode {} account {}: {}", T::ACCOUNT_NAME, address, err),
            }
        }

        debug!("loaded {} {} accounts at slot {}", stored, T::ACCOUNT_NAME, response.slot);
        Ok(stored)
    }

    pub fn state(&self) -> Result<ExchangeState, MirrorError> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.data.clone())
            .ok_or(MirrorError::NotLoaded(ErrorInfo::StaticStr("exchange state")))
    }

    pub fn perp_market(&self, market_index: u16) -> Result<PerpMarket, MirrorError> {
        self.perp_markets
            .get(&market_index)
            .map(|m| m.data.clone())
            .ok_or_else(|| MirrorError::NotLoaded(format!("perp market {market_index}").into()))
    }

    pub fn spot_market(&self, market_index: u16) -> Result<SpotMarket, MirrorError> {
        self.spot_markets
            .get(&market_index)
            .map(|m| m.data.clone())
            .ok_or_else(|| MirrorError::NotLoaded(format!("spot market {market_index}").into()))
    }

    pub fn perp_markets(&self) -> Vec<PerpMarket> {
        let mut markets: Vec<PerpMarket> = self.perp_markets.iter().map(|m| m.data.clone()).collect();
        markets.sort_by_key(|m| m.market_index);
        markets
    }

    pub fn spot_markets(&self) -> Vec<SpotMarket> {
        let mut markets: Vec<SpotMarket> = self.spot_markets.iter().map(|m| m.data.clone()).collect();
        markets.sort_by_key(|m| m.market_index);
        markets
    }

    /// Which market, if any, lives at `address`.
    pub fn market_for_address(&self, address: &Pubkey) -> Option<(MarketType, u16)> {
        self.market_addresses.get(address).map(|entry| *entry)
    }

    fn oracle_with_slot(&self, address: &Pubkey) -> Option<DataAndSlot<OraclePriceData>> {
        if *address == ORACLE_DEFAULT_KEY {
            return Some(DataAndSlot::new(QUOTE_ORACLE_PRICE_DATA, 0));
        }
        self.oracles.get(address).map(|o| o.value().clone())
    }

    pub fn has_oracle(&self, address: &Pubkey) -> bool {
        *address == ORACLE_DEFAULT_KEY || self.oracles.contains_key(address)
    }

    pub fn oracle_price_data(&self, address: &Pubkey) -> Result<OraclePriceData, MirrorError> {
        self.oracle_with_slot(address)
            .map(|o| o.data)
            .ok_or(MirrorError::NotLoaded(address.into()))
    }

    pub fn oracle_for_perp_market(&self, market_index: u16) -> Result<OraclePriceData, MirrorError> {
        let market = self.perp_market(market_index)?;
        self.oracle_price_data(&market.oracle)
    }

    pub fn oracle_for_spot_market(&self, market_index: u16) -> Result<OraclePriceData, MirrorError> {
        let market = self.spot_market(market_index)?;
        self.oracle_price_data(&market.oracle)
    }

    pub fn user(&self, key: &UserKey) -> Option<DataAndSlot<UserAccount>> {
        self.users.get(key).map(|u| u.value().clone())
    }

    pub fn remove_user(&self, key: &UserKey) -> Option<UserAccount> {
        self.users.remove(key).map(|(_, u)| u.data)
    }
}
