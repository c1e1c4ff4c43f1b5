#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_account::Account;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_pubkey::Pubkey;

use exchange_mirror::{
    cache::StateCache,
    config::DEFAULT_PROGRAM_ID,
    ledger::{DataAndSlot, LedgerError, LedgerReader, MemcmpFilter},
    state::{
        ExchangeState, OraclePriceData, OracleSource, PerpMarket, PerpPosition, SpotMarket, SpotPosition,
        UserAccount,
        addresses::{perp_market_address, spot_market_address},
        decoder::{AccountDiscriminator, AnchorRecordDecoder, encode_account},
        encode_name,
        oracle::PrelaunchOracle,
    },
    subscription::{ChannelEvent, ChannelFactory, RawUpdate, SubscriptionError, UpdateCallback, UpdateChannel, WatchKey},
};

pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn program_id() -> Pubkey {
    Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap()
}

/// Ledger held in memory. Every read is served at the current slot.
pub struct InMemoryLedger {
    program_id: Pubkey,
    accounts: Mutex<AHashMap<Pubkey, Account>>,
    slot: AtomicU64,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            program_id: program_id(),
            accounts: Mutex::new(AHashMap::default()),
            slot: AtomicU64::new(1),
            reads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        let account = Account {
            lamports: 1_000_000,
            data,
            owner: self.program_id,
            executable: false,
            rent_epoch: 0,
        };
        self.accounts.lock().insert(address, account);
    }

    pub fn set_record<T: borsh::BorshSerialize + AccountDiscriminator>(&self, address: Pubkey, value: &T) {
        self.set_account(address, encode_account(value).unwrap());
    }

    pub fn remove_account(&self, address: &Pubkey) {
        self.accounts.lock().remove(address);
    }

    pub fn set_slot(&self, slot: u64) {
        self.slot.store(slot, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn begin_read(&self) -> Result<u64, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::FailedToFetchAccount(ClientError::from(ClientErrorKind::Custom(
                "ledger unavailable".to_string(),
            ))));
        }
        Ok(self.slot.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    async fn get_account(&self, address: &Pubkey) -> Result<DataAndSlot<Option<Account>>, LedgerError> {
        let slot = self.begin_read()?;
        Ok(DataAndSlot::new(self.accounts.lock().get(address).cloned(), slot))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<DataAndSlot<Vec<Option<Account>>>, LedgerError> {
        let slot = self.begin_read()?;
        let accounts = self.accounts.lock();
        Ok(DataAndSlot::new(
            addresses.iter().map(|address| accounts.get(address).cloned()).collect(),
            slot,
        ))
    }

    async fn get_program_accounts(
        &self,
        filters: &[MemcmpFilter],
    ) -> Result<DataAndSlot<Vec<(Pubkey, Account)>>, LedgerError> {
        let slot = self.begin_read()?;
        let mut matching: Vec<(Pubkey, Account)> = self
            .accounts
            .lock()
            .iter()
            .filter(|(_, account)| filters.iter().all(|filter| filter.matches(&account.data)))
            .map(|(address, account)| (*address, account.clone()))
            .collect();
        matching.sort_by_key(|(address, _)| *address);
        Ok(DataAndSlot::new(matching, slot))
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        self.begin_read()
    }
}

pub fn new_cache(ledger: &Arc<InMemoryLedger>) -> Arc<StateCache> {
    Arc::new(StateCache::new(ledger.clone(), Arc::new(AnchorRecordDecoder)))
}

pub fn exchange_state() -> ExchangeState {
    ExchangeState {
        admin: Pubkey::new_unique(),
        signer: Pubkey::new_unique(),
        quote_asset_mint: Pubkey::new_unique(),
        number_of_markets: 4,
        number_of_spot_markets: 2,
        signer_nonce: 255,
        exchange_status: 0,
    }
}

pub fn perp_market(market_index: u16, oracle: Pubkey, oracle_source: OracleSource) -> PerpMarket {
    PerpMarket {
        pubkey: perp_market_address(&program_id(), market_index),
        market_index,
        quote_spot_market_index: 0,
        oracle,
        oracle_source,
        name: encode_name(&format!("PERP-{market_index}")),
        status: 1,
    }
}

pub fn spot_market(market_index: u16, oracle: Pubkey, oracle_source: OracleSource) -> SpotMarket {
    SpotMarket {
        pubkey: spot_market_address(&program_id(), market_index),
        market_index,
        oracle,
        oracle_source,
        mint: Pubkey::new_unique(),
        vault: Pubkey::new_unique(),
        decimals: 6,
        name: encode_name(&format!("SPOT-{market_index}")),
        status: 1,
    }
}

pub fn price(price: i64) -> OraclePriceData {
    OraclePriceData {
        price,
        confidence: 1,
        slot: 0,
        has_sufficient_number_of_data_points: true,
        max_price: None,
    }
}

pub fn prelaunch_oracle(price: i64, perp_market_index: u16) -> PrelaunchOracle {
    PrelaunchOracle {
        price,
        max_price: price * 2,
        confidence: 10,
        last_update_slot: 1,
        amm_last_update_slot: 1,
        perp_market_index,
    }
}

pub fn user(authority: Pubkey, sub_account_id: u16) -> UserAccount {
    UserAccount {
        authority,
        sub_account_id,
        name: encode_name("Main Account"),
        ..Default::default()
    }
}

pub fn with_perp_position(mut user: UserAccount, slot: usize, market_index: u16) -> UserAccount {
    user.perp_positions[slot] = PerpPosition {
        market_index,
        base_asset_amount: 1_000,
        quote_asset_amount: -1_000,
        ..Default::default()
    };
    user
}

pub fn with_spot_position(mut user: UserAccount, slot: usize, market_index: u16, open_bids: i64) -> UserAccount {
    user.spot_positions[slot] = SpotPosition {
        market_index,
        scaled_balance: 500,
        open_bids,
        open_orders: u8::from(open_bids != 0),
        ..Default::default()
    };
    user
}

/// Test-side handle on a channel created by [`ScriptedFactory`].
pub struct ChannelHandle {
    pub key: WatchKey,
    callback: Mutex<Option<UpdateCallback>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ChannelHandle {
    /// Deliver `update` through the callback the channel was started with.
    /// Works even after `stop`, standing in for a late in-flight delivery.
    pub fn emit(&self, address: Pubkey, data: Vec<u8>, slot: u64) -> bool {
        self.send(ChannelEvent::Update(RawUpdate { address, data, slot }))
    }

    /// Report activity with nothing to deliver.
    pub fn heartbeat(&self) -> bool {
        self.send(ChannelEvent::Heartbeat)
    }

    /// Report the underlying stream as ended.
    pub fn close(&self) -> bool {
        self.send(ChannelEvent::Closed)
    }

    fn send(&self, event: ChannelEvent) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct ScriptedChannel {
    handle: Arc<ChannelHandle>,
    fail_start: bool,
    can_stall: bool,
    start_delay: Duration,
}

#[async_trait]
impl UpdateChannel for ScriptedChannel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn can_stall(&self) -> bool {
        self.can_stall
    }

    async fn start(&mut self, on_update: UpdateCallback) -> Result<(), SubscriptionError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_start {
            return Err(SubscriptionError::ChannelClosed("scripted"));
        }
        *self.handle.callback.lock() = Some(on_update);
        self.handle.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) {
        self.handle.stopped.store(true, Ordering::SeqCst);
    }
}

/// Hands out scripted channels and keeps a handle to each.
pub struct ScriptedFactory {
    handles: Mutex<Vec<Arc<ChannelHandle>>>,
    failing_starts: AtomicUsize,
    can_stall: bool,
    start_delay_ms: AtomicU64,
}

impl ScriptedFactory {
    pub fn new(can_stall: bool) -> Arc<Self> {
        Arc::new(Self {
            handles: Mutex::new(Vec::new()),
            failing_starts: AtomicUsize::new(0),
            can_stall,
            start_delay_ms: AtomicU64::new(0),
        })
    }

    /// Make every later handshake take `delay`.
    pub fn delay_starts(&self, delay: Duration) {
        self.start_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `count` channels fail their handshake.
    pub fn fail_next_starts(&self, count: usize) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn handle(&self, index: usize) -> Arc<ChannelHandle> {
        self.handles.lock()[index].clone()
    }

    pub fn last(&self) -> Arc<ChannelHandle> {
        self.handles.lock().last().cloned().unwrap()
    }
}

impl ChannelFactory for ScriptedFactory {
    fn create(&self, key: &WatchKey) -> Box<dyn UpdateChannel> {
        let fail_start = self
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let handle = Arc::new(ChannelHandle {
            key: key.clone(),
            callback: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        self.handles.lock().push(handle.clone());

        Box::new(ScriptedChannel {
            handle,
            fail_start,
            can_stall: self.can_stall,
            start_delay: Duration::from_millis(self.start_delay_ms.load(Ordering::SeqCst)),
        })
    }
}
