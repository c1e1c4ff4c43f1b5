//! Typed records mirrored from the exchange program.
//!
//! Every record here is stored on the ledger as an 8-byte account
//! discriminator followed by a borsh-encoded body (see
//! [`decoder::AnchorRecordDecoder`]).

pub mod addresses;
pub mod decoder;
pub mod oracle;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_pubkey::Pubkey;

pub use oracle::{OraclePriceData, OracleSource};

/// Spot market through which every spot settlement nets.
pub const QUOTE_SPOT_MARKET_INDEX: u16 = 0;

/// Number of perp position slots in a user account.
pub const MAX_PERP_POSITIONS: usize = 8;

/// Number of spot position slots in a user account.
pub const MAX_SPOT_POSITIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketType {
    Perp,
    Spot,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Perp => write!(f, "perp"),
            MarketType::Spot => write!(f, "spot"),
        }
    }
}

/// Exchange-wide configuration. One per deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ExchangeState {
    pub admin: Pubkey,
    pub signer: Pubkey,
    pub quote_asset_mint: Pubkey,
    pub number_of_markets: u16,
    pub number_of_spot_markets: u16,
    pub signer_nonce: u8,
    pub exchange_status: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PerpMarket {
    /// Address of this market's account.
    pub pubkey: Pubkey,
    pub market_index: u16,
    /// Spot market the perp is quoted (and settled) in.
    pub quote_spot_market_index: u16,
    pub oracle: Pubkey,
    pub oracle_source: OracleSource,
    pub name: [u8; 32],
    pub status: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SpotMarket {
    /// Address of this market's account.
    pub pubkey: Pubkey,
    pub market_index: u16,
    pub oracle: Pubkey,
    pub oracle_source: OracleSource,
    pub mint: Pubkey,
    pub vault: Pubkey,
    pub decimals: u32,
    pub name: [u8; 32],
    pub status: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PerpPosition {
    pub market_index: u16,
    pub base_asset_amount: i64,
    pub quote_asset_amount: i64,
    pub lp_shares: u64,
    pub open_bids: i64,
    pub open_asks: i64,
    pub open_orders: u8,
}

impl PerpPosition {
    /// An available slot holds no base, quote, LP shares or open orders.
    pub fn is_available(&self) -> bool {
        self.base_asset_amount == 0
            && self.quote_asset_amount == 0
            && self.lp_shares == 0
            && self.open_orders == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum SpotBalanceType {
    #[default]
    Deposit,
    Borrow,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SpotPosition {
    pub market_index: u16,
    pub scaled_balance: u64,
    pub balance_type: SpotBalanceType,
    pub open_bids: i64,
    pub open_asks: i64,
    pub open_orders: u8,
}

impl SpotPosition {
    pub fn is_available(&self) -> bool {
        self.scaled_balance == 0 && self.open_orders == 0
    }

    pub fn has_open_orders(&self) -> bool {
        self.open_bids != 0 || self.open_asks != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct UserAccount {
    pub authority: Pubkey,
    pub delegate: Pubkey,
    pub name: [u8; 32],
    pub sub_account_id: u16,
    pub perp_positions: [PerpPosition; MAX_PERP_POSITIONS],
    pub spot_positions: [SpotPosition; MAX_SPOT_POSITIONS],
    pub last_active_slot: u64,
}

impl UserAccount {
    pub fn key(&self) -> UserKey {
        UserKey::new(self.sub_account_id, self.authority)
    }

    pub fn active_perp_positions(&self) -> impl Iterator<Item = &PerpPosition> {
        self.perp_positions.iter().filter(|p| !p.is_available())
    }

    pub fn active_spot_positions(&self) -> impl Iterator<Item = &SpotPosition> {
        self.spot_positions.iter().filter(|p| !p.is_available())
    }
}

/// Composite key of a user account: one authority owns many sub-accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserKey {
    pub sub_account_id: u16,
    pub authority: Pubkey,
}

impl UserKey {
    pub fn new(sub_account_id: u16, authority: Pubkey) -> Self {
        Self {
            sub_account_id,
            authority,
        }
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.authority, self.sub_account_id)
    }
}

/// The kinds of record the mirror tracks. Oracles are decoded per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    State,
    PerpMarket,
    SpotMarket,
    User,
    Oracle(OracleSource),
}

/// A decoded record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    State(ExchangeState),
    PerpMarket(PerpMarket),
    SpotMarket(SpotMarket),
    User(UserAccount),
    Oracle(OraclePriceData),
}

impl Record {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Record::State(_) => "state",
            Record::PerpMarket(_) => "perp market",
            Record::SpotMarket(_) => "spot market",
            Record::User(_) => "user",
            Record::Oracle(_) => "oracle",
        }
    }
}

/// Decode a fixed-width, zero-padded name.
pub fn decode_name(bytes: &[u8; 32]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Encode a name into the fixed 32-byte, space-padded form the program stores.
pub fn encode_name(name: &str) -> [u8; 32] {
    let mut out = [b' '; 32];
    let bytes = name.as_bytes();
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}
