//! An RPC-backed `LedgerReader`.
//!
//! `RpcLedgerReader` wraps a nonblocking `RpcClient` and reports the context
//! slot of every response so that the state cache can stamp records with the
//! slot they were observed at.
//!
//! Multi-account reads are split into batches of `MAX_MULTIPLE_ACCOUNTS`
//! addresses, the RPC limit for `getMultipleAccounts`.

use async_trait::async_trait;
use log::debug;
use solana_account::Account;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;

use crate::ledger::{DataAndSlot, LedgerError, LedgerReader, MemcmpFilter};

/// Maximum number of addresses per `getMultipleAccounts` request.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

pub struct RpcLedgerReader {
    rpc_client: RpcClient,
    program_id: Pubkey,
    commitment: CommitmentConfig,
}

impl RpcLedgerReader {
    /// Construct a reader from an existing `RpcClient`, reading at the
    /// client's own commitment.
    pub fn new(rpc_client: RpcClient, program_id: Pubkey) -> Self {
        let commitment = rpc_client.commitment();
        Self {
            rpc_client,
            program_id,
            commitment,
        }
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn rpc_client(&self) -> &RpcClient {
        &self.rpc_client
    }
}

pub(crate) fn to_rpc_filters(filters: &[MemcmpFilter]) -> Vec<RpcFilterType> {
    filters
        .iter()
        .map(|filter| RpcFilterType::Memcmp(Memcmp::new_base58_encoded(filter.offset, &filter.bytes)))
        .collect()
}

#[async_trait]
impl LedgerReader for RpcLedgerReader {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    async fn get_account(&self, address: &Pubkey) -> Result<DataAndSlot<Option<Account>>, LedgerError> {
        let response = self
            .rpc_client
            .get_account_with_commitment(address, self.commitment)
            .await?;

        Ok(DataAndSlot::new(response.value, response.context.slot))
    }

    /// Steps:
    /// 1. Split `addresses` into batches of `MAX_MULTIPLE_ACCOUNTS`.
    /// 2. Fetch each batch with `get_multiple_accounts_with_commitment`.
    /// 3. Concatenate in input order; the reported slot is the lowest slot of
    ///    any batch so that no record is stamped fresher than it is.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<DataAndSlot<Vec<Option<Account>>>, LedgerError> {
        let mut accounts = Vec::with_capacity(addresses.len());
        let mut slot: Option<u64> = None;

        for chunk in addresses.chunks(MAX_MULTIPLE_ACCOUNTS) {
            let response = self
                .rpc_client
                .get_multiple_accounts_with_commitment(chunk, self.commitment)
                .await?;

            if response.value.len() != chunk.len() {
                return Err(LedgerError::LengthMismatch {
                    expected: chunk.len(),
                    actual: response.value.len(),
                });
            }

            slot = Some(slot.map_or(response.context.slot, |s| s.min(response.context.slot)));
            accounts.extend(response.value);
        }

        let slot = match slot {
            Some(slot) => slot,
            None => self.get_slot().await?,
        };

        Ok(DataAndSlot::new(accounts, slot))
    }

    async fn get_program_accounts(
        &self,
        filters: &[MemcmpFilter],
    ) -> Result<DataAndSlot<Vec<(Pubkey, Account)>>, LedgerError> {
        // getProgramAccounts carries no context slot, so read the slot first
        // and stamp the scan with it.
        let slot = self.get_slot().await?;

        let config = RpcProgramAccountsConfig {
            filters: Some(to_rpc_filters(filters)),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };

        let accounts = self
            .rpc_client
            .get_program_accounts_with_config(&self.program_id, config)
            .await?;

        debug!(
            "program scan on {} returned {} accounts at slot {}",
            self.program_id,
            accounts.len(),
            slot
        );

        Ok(DataAndSlot::new(accounts, slot))
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        Ok(self.rpc_client.get_slot_with_commitment(self.commitment).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcmp_filters_are_base58_encoded() {
        let filters = to_rpc_filters(&[MemcmpFilter::new(8, vec![1, 2, 3])]);
        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters[0],
            RpcFilterType::Memcmp(Memcmp::new_base58_encoded(8, &[1, 2, 3]))
        );
    }
}
