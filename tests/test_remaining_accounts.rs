mod common;

#[cfg(test)]
mod remaining_accounts {
    use ahash::AHashSet;
    use rstest::rstest;
    use solana_instruction::AccountMeta;
    use solana_pubkey::Pubkey;

    use exchange_mirror::{
        RemainingAccountParams, RemainingAccountResolver,
        error::{ErrorInfo, MirrorError},
        state::{MarketType, OracleSource, Record, oracle::ORACLE_DEFAULT_KEY},
    };

    use crate::common::*;

    fn meta(pubkey: Pubkey, is_writable: bool) -> AccountMeta {
        AccountMeta {
            pubkey,
            is_signer: false,
            is_writable,
        }
    }

    /// Cache with quote spot market 0 (sentinel oracle), spot market 1 and
    /// perp markets 2 and 3, each with its own oracle.
    struct Fixture {
        cache: std::sync::Arc<exchange_mirror::StateCache>,
        spot1_oracle: Pubkey,
        perp2_oracle: Pubkey,
        perp3_oracle: Pubkey,
    }

    fn fixture() -> Fixture {
        init_test_logger();
        let ledger = InMemoryLedger::new();
        let cache = new_cache(&ledger);

        let spot1_oracle = Pubkey::new_unique();
        let perp2_oracle = Pubkey::new_unique();
        let perp3_oracle = Pubkey::new_unique();

        for market in [
            spot_market(0, ORACLE_DEFAULT_KEY, OracleSource::QuoteAsset),
            spot_market(1, spot1_oracle, OracleSource::PythPull),
        ] {
            cache.put(market.pubkey, Record::SpotMarket(market), 10);
        }
        for market in [
            perp_market(2, perp2_oracle, OracleSource::PythPull),
            perp_market(3, perp3_oracle, OracleSource::Pyth1MPull),
        ] {
            cache.put(market.pubkey, Record::PerpMarket(market), 10);
        }
        for oracle in [spot1_oracle, perp2_oracle, perp3_oracle] {
            cache.put(oracle, Record::Oracle(price(1_000_000)), 10);
        }

        Fixture {
            cache,
            spot1_oracle,
            perp2_oracle,
            perp3_oracle,
        }
    }

    fn spot(f: &Fixture, index: u16) -> Pubkey {
        f.cache.spot_market(index).unwrap().pubkey
    }

    fn perp(f: &Fixture, index: u16) -> Pubkey {
        f.cache.perp_market(index).unwrap().pubkey
    }

    #[test]
    fn single_perp_position_resolves_oracle_quote_and_market() {
        let f = fixture();
        let user = with_perp_position(user(Pubkey::new_unique(), 0), 0, 2);

        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![user]))
            .unwrap();

        assert_eq!(
            metas,
            vec![
                meta(f.perp2_oracle, false),
                meta(spot(&f, 0), false),
                meta(perp(&f, 2), false),
            ]
        );
    }

    #[test]
    fn output_is_grouped_oracles_then_spot_then_perp() {
        let f = fixture();
        let user = with_spot_position(with_perp_position(user(Pubkey::new_unique(), 0), 0, 3), 0, 1, 0);

        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![user]).readable_perp([2]))
            .unwrap();

        assert_eq!(
            metas,
            vec![
                meta(f.perp3_oracle, false),
                meta(f.spot1_oracle, false),
                meta(f.perp2_oracle, false),
                meta(spot(&f, 0), false),
                meta(spot(&f, 1), false),
                meta(perp(&f, 3), false),
                meta(perp(&f, 2), false),
            ]
        );
    }

    #[test]
    fn spot_position_with_open_orders_adds_quote_market() {
        let f = fixture();
        let authority = Pubkey::new_unique();

        let without_orders = with_spot_position(user(authority, 0), 0, 1, 0);
        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![without_orders]))
            .unwrap();
        assert_eq!(metas, vec![meta(f.spot1_oracle, false), meta(spot(&f, 1), false)]);

        let with_orders = with_spot_position(user(authority, 0), 0, 1, 25);
        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![with_orders]))
            .unwrap();
        assert_eq!(
            metas,
            vec![meta(f.spot1_oracle, false), meta(spot(&f, 1), false), meta(spot(&f, 0), false)]
        );
    }

    #[test]
    fn writable_override_upgrades_but_never_downgrades() {
        let f = fixture();
        let user = with_perp_position(user(Pubkey::new_unique(), 0), 0, 2);

        let params = RemainingAccountParams::new(vec![user])
            .writable_perp([2])
            .readable_perp([2])
            .writable_spot([0]);
        let metas = RemainingAccountResolver::new(&f.cache).resolve(&params).unwrap();

        assert_eq!(
            metas,
            vec![
                meta(f.perp2_oracle, false),
                meta(spot(&f, 0), true),
                meta(perp(&f, 2), true),
            ]
        );
    }

    #[test]
    fn no_duplicates_across_users_and_overrides() {
        let f = fixture();
        let first = with_perp_position(user(Pubkey::new_unique(), 0), 0, 2);
        let second = with_spot_position(with_perp_position(user(Pubkey::new_unique(), 1), 3, 2), 1, 1, 7);

        let params = RemainingAccountParams::new(vec![first, second])
            .readable_perp([2, 3, 2])
            .readable_spot([1, 0])
            .writable_perp([3]);
        let metas = RemainingAccountResolver::new(&f.cache).resolve(&params).unwrap();

        let unique: AHashSet<Pubkey> = metas.iter().map(|m| m.pubkey).collect();
        assert_eq!(unique.len(), metas.len());
        assert_eq!(metas.len(), 7);
        assert!(metas.iter().all(|m| !m.is_signer));
    }

    #[rstest]
    #[case::older_freshness_keeps_entry(50, true)]
    #[case::equal_freshness_prunes(100, false)]
    #[case::newer_freshness_prunes(150, false)]
    fn slot_cache_entries_are_filtered_by_freshness(#[case] freshness_slot: u64, #[case] included: bool) {
        let f = fixture();
        let market = perp_market(5, f.perp2_oracle, OracleSource::PythPull);
        f.cache.put(market.pubkey, Record::PerpMarket(market.clone()), 10);
        f.cache.slot_cache().set_perp(5, 100);

        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![]).with_slot_cache(freshness_slot))
            .unwrap();

        assert_eq!(metas.iter().any(|m| m.pubkey == market.pubkey), included);
        assert_eq!(f.cache.slot_cache().get(MarketType::Perp, 5).is_some(), included);
    }

    #[test]
    fn slot_cache_is_ignored_unless_enabled() {
        let f = fixture();
        f.cache.slot_cache().set_spot(1, 100);

        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![]))
            .unwrap();

        assert!(metas.is_empty());
        assert_eq!(f.cache.slot_cache().get(MarketType::Spot, 1), Some(100));
    }

    #[test]
    fn missing_oracle_fails_resolution() {
        let f = fixture();
        let orphan_oracle = Pubkey::new_unique();
        let market = perp_market(3, orphan_oracle, OracleSource::PythPull);
        f.cache.put(market.pubkey, Record::PerpMarket(market), 11);

        let err = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![]).readable_perp([3]))
            .unwrap_err();

        match err {
            MirrorError::MissingDependency(ErrorInfo::Pubkey(address)) => assert_eq!(address, orphan_oracle),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_market_fails_resolution() {
        let f = fixture();
        let user = with_perp_position(user(Pubkey::new_unique(), 0), 0, 9);

        let err = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![user]))
            .unwrap_err();

        assert!(matches!(err, MirrorError::MissingDependency(_)));
    }

    #[test]
    fn prelaunch_oracles_are_writable() {
        let f = fixture();
        let prelaunch = Pubkey::new_unique();
        let market = perp_market(4, prelaunch, OracleSource::Prelaunch);
        f.cache.put(market.pubkey, Record::PerpMarket(market.clone()), 10);
        f.cache.put(prelaunch, Record::Oracle(price(5_000_000)), 10);

        let metas = RemainingAccountResolver::new(&f.cache)
            .resolve(&RemainingAccountParams::new(vec![]).readable_perp([4]))
            .unwrap();

        assert_eq!(
            metas,
            vec![meta(prelaunch, true), meta(spot(&f, 0), false), meta(market.pubkey, false)]
        );
    }
}
