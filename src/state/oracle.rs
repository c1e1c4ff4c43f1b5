//! Oracle sources and the price data decoded from them.
//!
//! Each market names an oracle address and an `OracleSource`; the source
//! decides how the oracle account is laid out. Prices are normalised to
//! `PRICE_PRECISION` (six decimals) regardless of source.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_pubkey::Pubkey;

use crate::state::decoder::DecodeError;

pub const PRICE_PRECISION_EXP: i32 = 6;
pub const PRICE_PRECISION: i64 = 1_000_000;

/// Oracle address used by markets without a real price feed (the quote
/// market). Never attached to an instruction and never looked up on chain.
pub const ORACLE_DEFAULT_KEY: Pubkey = Pubkey::new_from_array([0; 32]);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum OracleSource {
    #[default]
    Pyth,
    Switchboard,
    QuoteAsset,
    Pyth1K,
    Pyth1M,
    PythStableCoin,
    Prelaunch,
    PythPull,
    Pyth1KPull,
    Pyth1MPull,
    PythStableCoinPull,
    SwitchboardOnDemand,
}

impl OracleSource {
    /// Prelaunch oracles live in the exchange program and are updated by the
    /// instructions that read them, so they must be attached writable.
    pub fn is_prelaunch(&self) -> bool {
        matches!(self, OracleSource::Prelaunch)
    }

    /// Multiplier applied to the raw feed price (1K/1M feeds quote a basket).
    pub fn multiplier(&self) -> i64 {
        match self {
            OracleSource::Pyth1K | OracleSource::Pyth1KPull => 1_000,
            OracleSource::Pyth1M | OracleSource::Pyth1MPull => 1_000_000,
            _ => 1,
        }
    }

    pub fn is_pull(&self) -> bool {
        matches!(
            self,
            OracleSource::PythPull
                | OracleSource::Pyth1KPull
                | OracleSource::Pyth1MPull
                | OracleSource::PythStableCoinPull
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OraclePriceData {
    pub price: i64,
    pub confidence: u64,
    pub slot: u64,
    pub has_sufficient_number_of_data_points: bool,
    pub max_price: Option<i64>,
}

/// Price data reported for the quote asset: always exactly one.
pub const QUOTE_ORACLE_PRICE_DATA: OraclePriceData = OraclePriceData {
    price: PRICE_PRECISION,
    confidence: 1,
    slot: 0,
    has_sufficient_number_of_data_points: true,
    max_price: None,
};

#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub struct PriceFeedMessage {
    pub feed_id: [u8; 32],
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub prev_publish_time: i64,
    pub publish_time: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, BorshDeserialize, BorshSerialize)]
pub enum VerificationLevel {
    Partial { num_signatures: u8 },
    Full,
}

/// A pull-oracle price update account.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub struct PriceUpdateV2 {
    pub write_authority: Pubkey,
    pub verification_level: VerificationLevel,
    pub price_message: PriceFeedMessage,
    pub posted_slot: u64,
}

impl PriceUpdateV2 {
    pub fn to_price_data(&self, source: OracleSource) -> Result<OraclePriceData, DecodeError> {
        let message = &self.price_message;
        let multiplier = source.multiplier();
        let price = rescale(message.price, message.exponent)?
            .checked_mul(multiplier)
            .ok_or(DecodeError::PriceOverflow)?;
        let conf = i64::try_from(message.conf).map_err(|_| DecodeError::PriceOverflow)?;
        let confidence = rescale(conf, message.exponent)?
            .checked_mul(multiplier)
            .ok_or(DecodeError::PriceOverflow)?;

        Ok(OraclePriceData {
            price,
            confidence: confidence.unsigned_abs(),
            slot: self.posted_slot,
            has_sufficient_number_of_data_points: true,
            max_price: None,
        })
    }
}

/// Oracle owned by the exchange program for markets that trade before a real
/// feed exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PrelaunchOracle {
    pub price: i64,
    pub max_price: i64,
    pub confidence: u64,
    pub last_update_slot: u64,
    pub amm_last_update_slot: u64,
    pub perp_market_index: u16,
}

impl From<&PrelaunchOracle> for OraclePriceData {
    fn from(oracle: &PrelaunchOracle) -> Self {
        OraclePriceData {
            price: oracle.price,
            confidence: oracle.confidence,
            slot: oracle.amm_last_update_slot,
            has_sufficient_number_of_data_points: true,
            max_price: Some(oracle.max_price),
        }
    }
}

/// Convert `value * 10^exponent` into `PRICE_PRECISION` units.
fn rescale(value: i64, exponent: i32) -> Result<i64, DecodeError> {
    let shift = exponent
        .checked_add(PRICE_PRECISION_EXP)
        .ok_or(DecodeError::PriceOverflow)?;
    if shift >= 0 {
        10i64
            .checked_pow(shift as u32)
            .and_then(|factor| value.checked_mul(factor))
            .ok_or(DecodeError::PriceOverflow)
    } else {
        Ok(10i64
            .checked_pow(shift.unsigned_abs())
            .map_or(0, |divisor| value / divisor))
    }
}
