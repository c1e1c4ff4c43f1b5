//! Decoding raw account bytes into typed records.
//!
//! The cache and the subscription supervisor never interpret account bytes
//! themselves; they hand them to an injected [`RecordDecoder`]. The default
//! [`AnchorRecordDecoder`] expects the usual layout of an 8-byte discriminator
//! (`sha256("account:<Name>")[..8]`) followed by a borsh body. Trailing bytes
//! after the body are padding and ignored.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::hash::hash;
use thiserror::Error;

use crate::state::{
    ExchangeState, PerpMarket, Record, RecordKind, SpotMarket, UserAccount,
    oracle::{OraclePriceData, OracleSource, PrelaunchOracle, PriceUpdateV2, QUOTE_ORACLE_PRICE_DATA},
};

pub const ACCOUNT_DISCRIMINATOR_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("account data too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("discriminator does not match account type {0}")]
    DiscriminatorMismatch(&'static str),

    #[error("failed to deserialize account body: {0}")]
    Borsh(#[from] std::io::Error),

    #[error("oracle source {0:?} cannot be decoded")]
    UnsupportedOracleSource(OracleSource),

    #[error("oracle price does not fit in price precision")]
    PriceOverflow,
}

/// Maps raw account bytes to a typed record, one layout per `RecordKind`.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, kind: RecordKind, data: &[u8]) -> Result<Record, DecodeError>;
}

/// Account types that carry an 8-byte account discriminator.
pub trait AccountDiscriminator {
    const ACCOUNT_NAME: &'static str;

    fn discriminator() -> [u8; ACCOUNT_DISCRIMINATOR_LEN] {
        account_discriminator(Self::ACCOUNT_NAME)
    }
}

impl AccountDiscriminator for ExchangeState {
    const ACCOUNT_NAME: &'static str = "State";
}

impl AccountDiscriminator for PerpMarket {
    const ACCOUNT_NAME: &'static str = "PerpMarket";
}

impl AccountDiscriminator for SpotMarket {
    const ACCOUNT_NAME: &'static str = "SpotMarket";
}

impl AccountDiscriminator for UserAccount {
    const ACCOUNT_NAME: &'static str = "User";
}

impl AccountDiscriminator for PrelaunchOracle {
    const ACCOUNT_NAME: &'static str = "PrelaunchOracle";
}

impl AccountDiscriminator for PriceUpdateV2 {
    const ACCOUNT_NAME: &'static str = "PriceUpdateV2";
}

pub fn account_discriminator(name: &str) -> [u8; ACCOUNT_DISCRIMINATOR_LEN] {
    let digest = hash(format!("account:{name}").as_bytes()).to_bytes();
    let mut out = [0u8; ACCOUNT_DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..ACCOUNT_DISCRIMINATOR_LEN]);
    out
}

/// Check the discriminator and deserialize the body of a `T` account.
pub fn decode_account<T>(data: &[u8]) -> Result<T, DecodeError>
where
    T: BorshDeserialize + AccountDiscriminator,
{
    if data.len() < ACCOUNT_DISCRIMINATOR_LEN {
        return Err(DecodeError::TooShort {
            expected: ACCOUNT_DISCRIMINATOR_LEN,
            actual: data.len(),
        });
    }

    let (discriminator, mut body) = data.split_at(ACCOUNT_DISCRIMINATOR_LEN);
    if discriminator != T::discriminator() {
        return Err(DecodeError::DiscriminatorMismatch(T::ACCOUNT_NAME));
    }

    Ok(T::deserialize(&mut body)?)
}

/// Serialize `value` with its discriminator, as the program would store it.
pub fn encode_account<T>(value: &T) -> Result<Vec<u8>, DecodeError>
where
    T: BorshSerialize + AccountDiscriminator,
{
    let mut data = Vec::with_capacity(256);
    data.extend_from_slice(&T::discriminator());
    value.serialize(&mut data)?;
    Ok(data)
}

/// Default decoder for the exchange program's account layouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnchorRecordDecoder;

impl AnchorRecordDecoder {
    fn decode_oracle(&self, source: OracleSource, data: &[u8]) -> Result<OraclePriceData, DecodeError> {
        match source {
            OracleSource::QuoteAsset => Ok(QUOTE_ORACLE_PRICE_DATA),
            OracleSource::Prelaunch => {
                let oracle: PrelaunchOracle = decode_account(data)?;
                Ok(OraclePriceData::from(&oracle))
            }
            source if source.is_pull() => {
                let update: PriceUpdateV2 = decode_account(data)?;
                update.to_price_data(source)
            }
            source => Err(DecodeError::UnsupportedOracleSource(source)),
        }
    }
}

impl RecordDecoder for AnchorRecordDecoder {
    fn decode(&self, kind: RecordKind, data: &[u8]) -> Result<Record, DecodeError> {
        match kind {
            RecordKind::State => decode_account(data).map(Record::State),
            RecordKind::PerpMarket => decode_account(data).map(Record::PerpMarket),
            RecordKind::SpotMarket => decode_account(data).map(Record::SpotMarket),
            RecordKind::User => decode_account(data).map(Record::User),
            RecordKind::Oracle(source) => self.decode_oracle(source, data).map(Record::Oracle),
        }
    }
}
