//! `ExchangeClient` ties the mirror together for one authority: it owns the
//! state cache and the subscription supervisor, loads and watches the
//! exchange's markets, oracles and the authority's users, and resolves
//! remaining accounts for instructions it is about to submit.

use std::sync::Arc;

use ahash::AHashSet;
use log::{info, warn};
use solana_instruction::AccountMeta;
use solana_pubkey::Pubkey;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;

use crate::{
    cache::{CacheKey, StateCache},
    config::MirrorConfig,
    error::{ErrorInfo, MirrorError},
    ledger::{LedgerReader, MemcmpFilter, rpc::RpcLedgerReader},
    remaining_accounts::{RemainingAccountParams, RemainingAccountResolver},
    state::{
        ExchangeState, OraclePriceData, OracleSource, PerpMarket, Record, RecordKind, SpotMarket,
        UserAccount, UserKey,
        addresses::{state_address, user_address},
        decoder::{AccountDiscriminator, AnchorRecordDecoder, RecordDecoder},
        oracle::ORACLE_DEFAULT_KEY,
    },
    subscription::{
        ChannelFactory, EventCallback, LedgerChannelFactory, SubscriptionSupervisor, WatchFilter,
    },
};

/// Offset of `authority` in a user account, right after the discriminator.
pub const USER_AUTHORITY_OFFSET: usize = 8;

/// Filters selecting every user account owned by `authority`.
pub fn user_filters(authority: &Pubkey) -> Vec<MemcmpFilter> {
    vec![
        MemcmpFilter::new(0, UserAccount::discriminator()),
        MemcmpFilter::new(USER_AUTHORITY_OFFSET, authority.to_bytes()),
    ]
}

pub struct ExchangeClient {
    config: MirrorConfig,
    authority: Pubkey,
    cache: Arc<StateCache>,
    supervisor: SubscriptionSupervisor,
}

impl ExchangeClient {
    /// Build a client talking to the RPC and websocket endpoints in `config`.
    pub fn new(config: MirrorConfig, authority: Pubkey) -> Result<Self, MirrorError> {
        config.validate()?;
        let program_id = config.program_id()?;
        let commitment = config.commitment()?;

        let rpc_client = RpcClient::new_with_commitment(config.rpc_url.clone(), commitment);
        let reader: Arc<dyn LedgerReader> = Arc::new(RpcLedgerReader::new(rpc_client, program_id));
        let factory: Arc<dyn ChannelFactory> = Arc::new(LedgerChannelFactory::new(
            reader.clone(),
            config.ws_url.clone(),
            commitment,
            config.channel.clone(),
        ));

        Ok(Self::with_parts(config, authority, reader, Arc::new(AnchorRecordDecoder), factory))
    }

    /// Build a client from explicit parts.
    pub fn with_parts(
        config: MirrorConfig,
        authority: Pubkey,
        reader: Arc<dyn LedgerReader>,
        decoder: Arc<dyn RecordDecoder>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        let cache = Arc::new(StateCache::new(reader, decoder));
        let supervisor = SubscriptionSupervisor::new(cache.clone(), factory, config.supervisor_config());
        Self {
            config,
            authority,
            cache,
            supervisor,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn authority(&self) -> Pubkey {
        self.authority
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn supervisor(&self) -> &SubscriptionSupervisor {
        &self.supervisor
    }

    /// Populate the cache: exchange state, every market, the markets' oracles
    /// and the authority's users.
    pub async fn load(&self) -> Result<(), MirrorError> {
        self.load_state().await?;
        let perp_markets = self.cache.load_all::<PerpMarket>(RecordKind::PerpMarket).await?;
        let spot_markets = self.cache.load_all::<SpotMarket>(RecordKind::SpotMarket).await?;

        let oracle_keys: Vec<CacheKey> = self
            .market_oracles()
            .into_iter()
            .map(|(address, source)| CacheKey::Oracle { address, source })
            .collect();
        let oracles = self.cache.fetch_many(&oracle_keys).await?;
        if oracles < oracle_keys.len() {
            warn!("loaded {} of {} market oracles", oracles, oracle_keys.len());
        }

        let users = self.load_users().await?;

        info!(
            "loaded {} perp markets, {} spot markets, {} oracles, {} users",
            perp_markets, spot_markets, oracles, users
        );
        Ok(())
    }

    pub async fn load_state(&self) -> Result<ExchangeState, MirrorError> {
        match self.cache.fetch_now(&CacheKey::State).await {
            Some(Record::State(state)) => Ok(state),
            _ => Err(MirrorError::NotLoaded(ErrorInfo::StaticStr("exchange state"))),
        }
    }

    pub async fn load_oracle(&self, address: Pubkey, source: OracleSource) -> Option<OraclePriceData> {
        match self.cache.fetch_now(&CacheKey::Oracle { address, source }).await {
            Some(Record::Oracle(price)) => Some(price),
            _ => None,
        }
    }

    /// Fetch one of the authority's users. `None` when it does not exist.
    pub async fn load_user(&self, sub_account_id: u16) -> Option<UserAccount> {
        let key = UserKey::new(sub_account_id, self.authority);
        match self.cache.fetch_now(&CacheKey::User(key)).await {
            Some(Record::User(user)) => Some(user),
            _ => None,
        }
    }

    /// Scan for every user the authority owns.
    pub async fn load_users(&self) -> Result<usize, MirrorError> {
        let response = self
            .cache
            .reader()
            .get_program_accounts(&user_filters(&self.authority))
            .await?;

        let mut stored = 0;
        for (address, account) in response.data {
            match self.cache.decoder().decode(RecordKind::User, &account.data) {
                Ok(record) => {
                    self.cache.put(address, record, response.slot);
                    stored += 1;
                }
                Err(err) => warn!("failed to decode user {}: {}", address, err),
            }
        }
        Ok(stored)
    }

    /// Distinct (oracle, source) pairs referenced by cached markets, excluding
    /// the quote sentinel.
    fn market_oracles(&self) -> Vec<(Pubkey, OracleSource)> {
        let mut seen = AHashSet::new();
        let perp = self.cache.perp_markets().into_iter().map(|m| (m.oracle, m.oracle_source));
        let spot = self.cache.spot_markets().into_iter().map(|m| (m.oracle, m.oracle_source));
        perp.chain(spot)
            .filter(|(address, _)| *address != ORACLE_DEFAULT_KEY)
            .filter(|pair| seen.insert(*pair))
            .collect()
    }

    /// Watch the exchange state and every perp and spot market.
    pub async fn subscribe_markets(&self, on_event: Option<EventCallback>) -> Result<(), MirrorError> {
        let program_id = self.cache.program_id();
        self.supervisor
            .subscribe(
                RecordKind::State,
                WatchFilter::Account(state_address(&program_id)),
                on_event.clone(),
            )
            .await?;
        self.supervisor
            .subscribe(
                RecordKind::PerpMarket,
                WatchFilter::Program(vec![MemcmpFilter::new(0, PerpMarket::discriminator())]),
                on_event.clone(),
            )
            .await?;
        self.supervisor
            .subscribe(
                RecordKind::SpotMarket,
                WatchFilter::Program(vec![MemcmpFilter::new(0, SpotMarket::discriminator())]),
                on_event,
            )
            .await
    }

    /// Watch the oracle of every cached market. Markets must be loaded first.
    pub async fn subscribe_oracles(&self, on_event: Option<EventCallback>) -> Result<(), MirrorError> {
        for (address, source) in self.market_oracles() {
            self.supervisor
                .subscribe(RecordKind::Oracle(source), WatchFilter::Account(address), on_event.clone())
                .await?;
        }
        Ok(())
    }

    pub async fn subscribe_user(
        &self,
        sub_account_id: u16,
        on_event: Option<EventCallback>,
    ) -> Result<(), MirrorError> {
        let address = user_address(&self.cache.program_id(), &self.authority, sub_account_id);
        self.supervisor
            .subscribe(RecordKind::User, WatchFilter::Account(address), on_event)
            .await
    }

    pub async fn unsubscribe_user(&self, sub_account_id: u16) {
        let address = user_address(&self.cache.program_id(), &self.authority, sub_account_id);
        self.supervisor
            .unsubscribe(RecordKind::User, WatchFilter::Account(address))
            .await;
    }

    pub async fn unsubscribe_all(&self) {
        self.supervisor.unsubscribe_all().await;
    }

    /// Resolve remaining accounts for `params` against the mirrored state.
    pub fn remaining_accounts(&self, params: RemainingAccountParams) -> Result<Vec<AccountMeta>, MirrorError> {
        RemainingAccountResolver::new(&self.cache).resolve(&params)
    }

    /// Remember that a submission at `slot` touched these markets.
    pub fn record_market_slots(&self, perp_market_indexes: &[u16], spot_market_indexes: &[u16], slot: u64) {
        let slot_cache = self.cache.slot_cache();
        for &market_index in perp_market_indexes {
            slot_cache.set_perp(market_index, slot);
        }
        for &market_index in spot_market_indexes {
            slot_cache.set_spot(market_index, slot);
        }
    }
}
