//! Property tests for the text codecs and checked arithmetic.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use zold_core::amount::Amount;
use zold_core::id::Id;
use zold_core::txn::Txn;

proptest! {
    #[test]
    fn id_text_round_trips(raw in any::<u64>()) {
        let id = Id::new(raw);
        prop_assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
    }

    #[test]
    fn txn_line_round_trips(
        id in 1u32..=0xFFFF,
        secs in 0i64..4_000_000_000,
        zents in prop::num::i64::ANY.prop_filter("non-zero", |z| *z != 0),
        prefix in "[a-zA-Z0-9]{8,32}",
        bnf in any::<u64>(),
        details in "[a-zA-Z0-9 @!?*_.:,'/-]{1,64}",
    ) {
        let date = Utc.timestamp_opt(secs, 0).unwrap();
        let txn = Txn::new(id, date, Amount::from_zents(zents), &prefix, Id::new(bnf), &details).unwrap();
        prop_assert_eq!(txn.to_string().parse::<Txn>().unwrap(), txn);
    }

    #[test]
    fn checked_arithmetic_never_panics(a in any::<i64>(), b in any::<i64>(), f in any::<i64>()) {
        let x = Amount::from_zents(a);
        let y = Amount::from_zents(b);
        let _ = x.checked_add(y);
        let _ = x.checked_sub(y);
        let _ = x.checked_mul(f);
        let _ = x.checked_neg();
    }

    #[test]
    fn amount_ordering_matches_zents(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(
            Amount::from_zents(a).cmp(&Amount::from_zents(b)),
            a.cmp(&b)
        );
    }
}
