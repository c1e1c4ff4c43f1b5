//! Program-derived addresses of the exchange program's accounts.

use solana_pubkey::Pubkey;

pub const STATE_SEED: &str = "drift_state";
pub const SIGNER_SEED: &str = "drift_signer";
pub const USER_SEED: &str = "user";
pub const USER_STATS_SEED: &str = "user_stats";
pub const PERP_MARKET_SEED: &str = "perp_market";
pub const SPOT_MARKET_SEED: &str = "spot_market";
pub const SPOT_MARKET_VAULT_SEED: &str = "spot_market_vault";
pub const INSURANCE_FUND_VAULT_SEED: &str = "insurance_fund_vault";

pub fn state_address(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[STATE_SEED.as_bytes()], program_id).0
}

pub fn signer_address(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[SIGNER_SEED.as_bytes()], program_id).0
}

pub fn user_address(program_id: &Pubkey, authority: &Pubkey, sub_account_id: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[
            USER_SEED.as_bytes(),
            authority.as_ref(),
            &sub_account_id.to_le_bytes(),
        ],
        program_id,
    )
    .0
}

pub fn user_stats_address(program_id: &Pubkey, authority: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[USER_STATS_SEED.as_bytes(), authority.as_ref()], program_id).0
}

pub fn perp_market_address(program_id: &Pubkey, market_index: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[PERP_MARKET_SEED.as_bytes(), &market_index.to_le_bytes()],
        program_id,
    )
    .0
}

pub fn spot_market_address(program_id: &Pubkey, market_index: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[SPOT_MARKET_SEED.as_bytes(), &market_index.to_le_bytes()],
        program_id,
    )
    .0
}

pub fn spot_market_vault_address(program_id: &Pubkey, market_index: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[SPOT_MARKET_VAULT_SEED.as_bytes(), &market_index.to_le_bytes()],
        program_id,
    )
    .0
}

pub fn insurance_fund_vault_address(program_id: &Pubkey, market_index: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[INSURANCE_FUND_VAULT_SEED.as_bytes(), &market_index.to_le_bytes()],
        program_id,
    )
    .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_addresses_differ_by_kind_and_index() {
        let program_id = Pubkey::new_unique();
        let perp_0 = perp_market_address(&program_id, 0);
        assert_eq!(perp_0, perp_market_address(&program_id, 0));
        assert_ne!(perp_0, perp_market_address(&program_id, 1));
        assert_ne!(perp_0, spot_market_address(&program_id, 0));
    }

    #[test]
    fn user_addresses_depend_on_sub_account() {
        let program_id = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        assert_ne!(
            user_address(&program_id, &authority, 0),
            user_address(&program_id, &authority, 1)
        );
    }
}
