//! Last-touched slots of markets written by locally submitted transactions.
//!
//! After a transaction that wrote to a market lands, the submitter records
//! the slot here. Until the user's own account view catches up with that
//! slot, the resolver keeps attaching the market even if no position refers
//! to it any more. Entries are hints, not ledger state.

use dashmap::DashMap;

use crate::state::MarketType;

#[derive(Debug, Default)]
pub struct SlotCache {
    perp: DashMap<u16, u64>,
    spot: DashMap<u16, u64>,
}

impl SlotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, market_type: MarketType) -> &DashMap<u16, u64> {
        match market_type {
            MarketType::Perp => &self.perp,
            MarketType::Spot => &self.spot,
        }
    }

    /// Record that `market_index` was touched at `slot`. A lower slot than the
    /// one already recorded is ignored.
    pub fn set(&self, market_type: MarketType, market_index: u16, slot: u64) {
        self.map(market_type)
            .entry(market_index)
            .and_modify(|current| *current = (*current).max(slot))
            .or_insert(slot);
    }

    pub fn set_perp(&self, market_index: u16, slot: u64) {
        self.set(MarketType::Perp, market_index, slot);
    }

    pub fn set_spot(&self, market_index: u16, slot: u64) {
        self.set(MarketType::Spot, market_index, slot);
    }

    pub fn get(&self, market_type: MarketType, market_index: u16) -> Option<u64> {
        self.map(market_type).get(&market_index).map(|slot| *slot)
    }

    pub fn len(&self) -> usize {
        self.perp.len() + self.spot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perp.is_empty() && self.spot.is_empty()
    }

    pub fn clear(&self) {
        self.perp.clear();
        self.spot.clear();
    }

    /// Return, in ascending index order, the markets whose recorded slot is
    /// strictly greater than `freshness_slot`, and drop every other entry.
    ///
    /// Removal re-checks the predicate under the shard lock, so an entry
    /// refreshed concurrently by the submitter survives.
    pub fn retain_fresh(&self, market_type: MarketType, freshness_slot: u64) -> Vec<u16> {
        let entries = self.sorted_entries(market_type);

        let mut fresh = Vec::with_capacity(entries.len());
        for (index, slot) in entries {
            if slot > freshness_slot {
                fresh.push(index);
            } else {
                self.remove_stale(market_type, index, freshness_slot);
            }
        }

        fresh
    }

    fn sorted_entries(&self, market_type: MarketType) -> Vec<(u16, u64)> {
        let mut entries: Vec<(u16, u64)> = self.map(market_type).iter().map(|e| (*e.key(), *e.value())).collect();
        entries.sort_unstable_by_key(|(index, _)| *index);
        entries
    }

    /// Remove the entry only if it is still at or below `freshness_slot`.
    fn remove_stale(&self, market_type: MarketType, market_index: u16, freshness_slot: u64) -> bool {
        self.map(market_type)
            .remove_if(&market_index, |_, current| *current <= freshness_slot)
            .is_some()
    }
}
