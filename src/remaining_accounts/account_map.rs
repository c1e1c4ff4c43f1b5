//! Insertion-ordered, key-deduplicated account lists whose access level can
//! only be upgraded.

use std::hash::Hash;

use ahash::AHashMap;
use solana_instruction::AccountMeta;
use solana_pubkey::Pubkey;

#[derive(Debug, Clone)]
pub struct AccountMap<K> {
    positions: AHashMap<K, usize>,
    metas: Vec<AccountMeta>,
}

impl<K> Default for AccountMap<K> {
    fn default() -> Self {
        Self {
            positions: AHashMap::default(),
            metas: Vec::new(),
        }
    }
}

impl<K: Eq + Hash> AccountMap<K> {
    /// Add `pubkey` under `key`. A key already present keeps its position; its
    /// access becomes writable if `is_writable` is set and never goes back to
    /// read-only.
    pub fn insert(&mut self, key: K, pubkey: Pubkey, is_writable: bool) {
        if let Some(&position) = self.positions.get(&key) {
            self.metas[position].is_writable |= is_writable;
            return;
        }

        self.positions.insert(key, self.metas.len());
        self.metas.push(AccountMeta {
            pubkey,
            is_signer: false,
            is_writable,
        });
    }

    pub fn get(&self, key: &K) -> Option<&AccountMeta> {
        self.positions.get(key).map(|&position| &self.metas[position])
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountMeta> {
        self.metas.iter()
    }

    pub fn into_metas(self) -> Vec<AccountMeta> {
        self.metas
    }
}
