use proptest::prelude::*;
use verity_engine::{vote_weight, weighted_gradient};

fn votes() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0f64..=1.0, -50.0f64..5000.0), 0..40)
}

proptest! {
    #[test]
    fn gradient_stays_in_unit_interval(votes in votes()) {
        let g = weighted_gradient(votes);
        prop_assert!((0.0..=1.0).contains(&g), "{}", g);
    }

    #[test]
    fn gradient_ignores_vote_order(votes in votes(), seed in any::<u64>()) {
        let mut shuffled = votes.clone();
        // deterministic rotate + reverse is enough to scramble the order
        if !shuffled.is_empty() {
            let k = (seed % shuffled.len() as u64) as usize;
            shuffled.rotate_left(k);
            if seed % 2 == 0 {
                shuffled.reverse();
            }
        }
        prop_assert_eq!(weighted_gradient(votes), weighted_gradient(shuffled));
    }

    #[test]
    fn lone_vote_is_its_own_gradient(value in 0.0f64..=1.0, reputation in -50.0f64..5000.0) {
        let g = weighted_gradient([(value, reputation)]);
        prop_assert!((g - value).abs() < 1e-12, "{} vs {}", g, value);
        prop_assert_eq!(weighted_gradient([(1.0, reputation)]), 1.0);
    }

    #[test]
    fn more_reputation_pulls_toward_the_voter(
        others in votes(),
        value in 0.0f64..=1.0,
        reputation in 0.0f64..2000.0,
        boost in 0.0f64..2000.0,
    ) {
        let before = weighted_gradient(others.iter().copied().chain([(value, reputation)]));
        let after = weighted_gradient(others.iter().copied().chain([(value, reputation + boost)]));
        prop_assert!(
            (after - value).abs() <= (before - value).abs() + 1e-9,
            "before {} after {} value {}", before, after, value
        );
    }

    #[test]
    fn weight_never_drops_below_the_floor(reputation in any::<f64>().prop_filter("finite", |r| r.is_finite())) {
        prop_assert!(vote_weight(reputation) >= 0.1);
    }
}

#[test]
fn empty_vote_set_is_uncertain() {
    assert_eq!(weighted_gradient(Vec::new()), 0.5);
}
