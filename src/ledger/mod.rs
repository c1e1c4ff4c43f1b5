pub mod rpc;

use async_trait::async_trait;
use solana_account::Account;
use solana_pubkey::Pubkey;
use thiserror::Error;

/// A value together with the ledger slot at which it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAndSlot<T> {
    pub data: T,
    pub slot: u64,
}

impl<T> DataAndSlot<T> {
    pub fn new(data: T, slot: u64) -> Self {
        Self { data, slot }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataAndSlot<U> {
        DataAndSlot {
            data: f(self.data),
            slot: self.slot,
        }
    }
}

/// A byte comparison against account data, used to narrow program-wide scans
/// and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemcmpFilter {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

impl MemcmpFilter {
    pub fn new(offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            bytes: bytes.into(),
        }
    }

    /// Whether `data` satisfies this filter.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.get(self.offset..self.offset + self.bytes.len())
            .is_some_and(|window| window == self.bytes.as_slice())
    }
}

/// Read access to the exchange program's accounts on the ledger.
///
/// The mirror receives an `Arc<dyn LedgerReader>` and uses it for explicit
/// loads, `fetch_now` and the polling/log-stream update channels.
///
/// Implementers must satisfy the following:
///
/// - **Thread-safety:** trait objects must be `Send + Sync`.
/// - **Deterministic ordering:** `get_multiple_accounts()` returns accounts in
///   the same order as the input addresses.
/// - **Absence is not an error:** an address with no backing account yields
///   `None`.
/// - **Slots:** every read reports the slot it was served at.
///
/// Typical implementations are `RpcLedgerReader` and in-memory fixtures.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// The program whose accounts are scanned by `get_program_accounts`.
    fn program_id(&self) -> Pubkey;

    /// Retrieve a single account.
    async fn get_account(&self, address: &Pubkey) -> Result<DataAndSlot<Option<Account>>, LedgerError>;

    /// Retrieve several accounts in one round trip, preserving input order.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<DataAndSlot<Vec<Option<Account>>>, LedgerError>;

    /// Retrieve every account owned by the program that matches all `filters`.
    async fn get_program_accounts(
        &self,
        filters: &[MemcmpFilter],
    ) -> Result<DataAndSlot<Vec<(Pubkey, Account)>>, LedgerError>;

    /// Current slot at the reader's commitment.
    async fn get_slot(&self) -> Result<u64, LedgerError>;
}

/// Errors from the ledger read layer.
///
/// These are transport errors only. Missing accounts are reported as `None`
/// and undecodable data is the decoder's concern.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// RPC client failed to serve the request.
    #[error("Failed to fetch account")]
    FailedToFetchAccount(#[from] solana_client::client_error::ClientError),

    /// A multi-account response did not line up with the request.
    #[error("Expected {expected} accounts, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LedgerError>();
};
