//! Remaining-account resolution.
//!
//! Program instructions that touch user margin need every market and oracle
//! the user has exposure to appended as trailing ("remaining") accounts. The
//! program expects them grouped as oracles, then spot markets, then perp
//! markets, each without duplicates.
//!
//! Resolution is a synchronous read of the [`StateCache`]. It never waits on
//! the network: it runs on the submission hot path. A referenced market or
//! oracle that is not cached fails the whole resolution with
//! `MirrorError::MissingDependency`.

pub mod account_map;

use solana_instruction::AccountMeta;
use solana_pubkey::Pubkey;

use crate::{
    cache::StateCache,
    error::{ErrorInfo, MirrorError},
    state::{
        MarketType, QUOTE_SPOT_MARKET_INDEX, UserAccount,
        oracle::{ORACLE_DEFAULT_KEY, OracleSource},
    },
};

pub use account_map::AccountMap;

/// What to resolve remaining accounts for.
///
/// `freshness_slot` is normally the slot at which the submitting user's own
/// account was last observed. With `use_slot_cache`, markets touched by local
/// submissions after that slot are attached even without a position. When it
/// is `None` the resolver uses the slot at which the first user account was
/// last cached, or 0 when that user is not cached.
#[derive(Debug, Clone, Default)]
pub struct RemainingAccountParams {
    pub user_accounts: Vec<UserAccount>,
    pub writable_perp_market_indexes: Vec<u16>,
    pub writable_spot_market_indexes: Vec<u16>,
    pub readable_perp_market_indexes: Vec<u16>,
    pub readable_spot_market_indexes: Vec<u16>,
    pub use_slot_cache: bool,
    pub freshness_slot: Option<u64>,
}

impl RemainingAccountParams {
    pub fn new(user_accounts: Vec<UserAccount>) -> Self {
        Self {
            user_accounts,
            ..Default::default()
        }
    }

    pub fn writable_perp(mut self, indexes: impl IntoIterator<Item = u16>) -> Self {
        self.writable_perp_market_indexes.extend(indexes);
        self
    }

    pub fn writable_spot(mut self, indexes: impl IntoIterator<Item = u16>) -> Self {
        self.writable_spot_market_indexes.extend(indexes);
        self
    }

    pub fn readable_perp(mut self, indexes: impl IntoIterator<Item = u16>) -> Self {
        self.readable_perp_market_indexes.extend(indexes);
        self
    }

    pub fn readable_spot(mut self, indexes: impl IntoIterator<Item = u16>) -> Self {
        self.readable_spot_market_indexes.extend(indexes);
        self
    }

    /// Use the slot cache with an explicit freshness slot. `0` keeps every
    /// recorded entry.
    pub fn with_slot_cache(mut self, freshness_slot: u64) -> Self {
        self.use_slot_cache = true;
        self.freshness_slot = Some(freshness_slot);
        self
    }

    /// Use the slot cache with the first user's cached slot as freshness slot.
    pub fn with_slot_cache_from_user(mut self) -> Self {
        self.use_slot_cache = true;
        self.freshness_slot = None;
        self
    }
}

#[derive(Debug, Default)]
struct RemainingAccountMaps {
    oracles: AccountMap<Pubkey>,
    spot_markets: AccountMap<u16>,
    perp_markets: AccountMap<u16>,
}

impl RemainingAccountMaps {
    fn into_metas(self) -> Vec<AccountMeta> {
        let mut metas =
            Vec::with_capacity(self.oracles.len() + self.spot_markets.len() + self.perp_markets.len());
        metas.extend(self.oracles.into_metas());
        metas.extend(self.spot_markets.into_metas());
        metas.extend(self.perp_markets.into_metas());
        metas
    }
}

pub struct RemainingAccountResolver<'a> {
    cache: &'a StateCache,
}

impl<'a> RemainingAccountResolver<'a> {
    pub fn new(cache: &'a StateCache) -> Self {
        Self { cache }
    }

    /// Compute the remaining accounts for `params`.
    ///
    /// Order of insertion (which fixes the order within each group):
    /// 1. markets of every in-use perp position, with their oracle and quote
    ///    spot market
    /// 2. markets of every in-use spot position, plus the quote spot market
    ///    when the position has open bids or asks
    /// 3. slot-cache markets touched after `freshness_slot` (stale entries are
    ///    pruned)
    /// 4. readable perp, readable spot, writable perp, writable spot overrides
    pub fn resolve(&self, params: &RemainingAccountParams) -> Result<Vec<AccountMeta>, MirrorError> {
        let mut maps = RemainingAccountMaps::default();

        for user in &params.user_accounts {
            for position in user.active_perp_positions() {
                self.add_perp_market(&mut maps, position.market_index, false)?;
            }

            for position in user.active_spot_positions() {
                self.add_spot_market(&mut maps, position.market_index, false)?;
                if position.has_open_orders() {
                    self.add_spot_market(&mut maps, QUOTE_SPOT_MARKET_INDEX, false)?;
                }
            }
        }

        if params.use_slot_cache {
            let freshness_slot = params
                .freshness_slot
                .unwrap_or_else(|| self.cached_user_slot(params));
            let slot_cache = self.cache.slot_cache();
            for market_index in slot_cache.retain_fresh(MarketType::Perp, freshness_slot) {
                self.add_perp_market(&mut maps, market_index, false)?;
            }
            for market_index in slot_cache.retain_fresh(MarketType::Spot, freshness_slot) {
                self.add_spot_market(&mut maps, market_index, false)?;
            }
        }

        for &market_index in &params.readable_perp_market_indexes {
            self.add_perp_market(&mut maps, market_index, false)?;
        }
        for &market_index in &params.readable_spot_market_indexes {
            self.add_spot_market(&mut maps, market_index, false)?;
        }
        for &market_index in &params.writable_perp_market_indexes {
            self.add_perp_market(&mut maps, market_index, true)?;
        }
        for &market_index in &params.writable_spot_market_indexes {
            self.add_spot_market(&mut maps, market_index, true)?;
        }

        Ok(maps.into_metas())
    }

    fn cached_user_slot(&self, params: &RemainingAccountParams) -> u64 {
        params
            .user_accounts
            .first()
            .and_then(|user| self.cache.user(&user.key()))
            .map_or(0, |user| user.slot)
    }

    fn add_perp_market(
        &self,
        maps: &mut RemainingAccountMaps,
        market_index: u16,
        writable: bool,
    ) -> Result<(), MirrorError> {
        let market = self
            .cache
            .perp_market(market_index)
            .map_err(|_| MirrorError::MissingDependency(format!("perp market {market_index}").into()))?;

        maps.perp_markets.insert(market_index, market.pubkey, writable);
        self.add_oracle(maps, &market.oracle, market.oracle_source)?;
        self.add_spot_market(maps, market.quote_spot_market_index, false)
    }

    fn add_spot_market(
        &self,
        maps: &mut RemainingAccountMaps,
        market_index: u16,
        writable: bool,
    ) -> Result<(), MirrorError> {
        let market = self
            .cache
            .spot_market(market_index)
            .map_err(|_| MirrorError::MissingDependency(format!("spot market {market_index}").into()))?;

        maps.spot_markets.insert(market_index, market.pubkey, writable);
        self.add_oracle(maps, &market.oracle, market.oracle_source)
    }

    fn add_oracle(
        &self,
        maps: &mut RemainingAccountMaps,
        oracle: &Pubkey,
        source: OracleSource,
    ) -> Result<(), MirrorError> {
        if *oracle == ORACLE_DEFAULT_KEY {
            return Ok(());
        }

        if !self.cache.has_oracle(oracle) {
            return Err(MirrorError::MissingDependency(ErrorInfo::Pubkey(*oracle)));
        }

        maps.oracles.insert(*oracle, *oracle, source.is_prelaunch());
        Ok(())
    }
}
