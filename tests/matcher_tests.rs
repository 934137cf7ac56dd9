//! Table-driven and property tests for alert matching and alert validation

use proptest::prelude::*;
use rstest::rstest;
use tick_alerts::alert::{evaluate, AlertCondition, NewAlert};
use tick_alerts::AlertError;

#[rstest]
#[case::above_exact(AlertCondition::Above, 150.0, 150.0, true)]
#[case::above_over(AlertCondition::Above, 150.0, 151.0, true)]
#[case::above_just_under(AlertCondition::Above, 150.0, 149.99, false)]
#[case::below_exact(AlertCondition::Below, 100.0, 100.0, true)]
#[case::below_under(AlertCondition::Below, 100.0, 99.5, true)]
#[case::below_just_over(AlertCondition::Below, 100.0, 100.01, false)]
#[case::unknown_at_target(AlertCondition::Unrecognized("CROSSES".into()), 100.0, 100.0, false)]
#[case::empty_condition(AlertCondition::Unrecognized(String::new()), 1.0, 5.0, false)]
fn test_boundaries(
    #[case] condition: AlertCondition,
    #[case] target: f64,
    #[case] current: f64,
    #[case] expected: bool,
) {
    assert_eq!(evaluate(&condition, target, current), expected);
}

#[rstest]
#[case("ABOVE", AlertCondition::Above)]
#[case("above", AlertCondition::Above)]
#[case(" Below ", AlertCondition::Below)]
#[case("SIDEWAYS", AlertCondition::Unrecognized("SIDEWAYS".into()))]
fn test_condition_parsing(#[case] raw: &str, #[case] expected: AlertCondition) {
    assert_eq!(AlertCondition::parse(raw), expected);
}

#[rstest]
#[case::zero_user(NewAlert::new(0, "AAPL", 150.0, AlertCondition::Above))]
#[case::blank_symbol(NewAlert::new(1, "  ", 150.0, AlertCondition::Above))]
#[case::zero_target(NewAlert::new(1, "AAPL", 0.0, AlertCondition::Above))]
#[case::negative_target(NewAlert::new(1, "AAPL", -3.0, AlertCondition::Below))]
#[case::nan_target(NewAlert::new(1, "AAPL", f64::NAN, AlertCondition::Below))]
#[case::unknown_condition(NewAlert::new(1, "AAPL", 10.0, AlertCondition::parse("CROSSES")))]
fn test_invalid_alerts_rejected(#[case] alert: NewAlert) {
    assert!(matches!(alert.validate(), Err(AlertError::InvalidAlert(_))));
}

#[test]
fn test_valid_alert_symbol_normalized() {
    let alert = NewAlert::new(3, " aapl ", 150.0, AlertCondition::Above)
        .validate()
        .unwrap();
    assert_eq!(alert.symbol, "AAPL");
}

fn finite_price() -> impl Strategy<Value = f64> {
    -1.0e9f64..1.0e9f64
}

proptest! {
    #[test]
    fn prop_above_is_inclusive_ge(target in finite_price(), current in finite_price()) {
        prop_assert_eq!(evaluate(&AlertCondition::Above, target, current), current >= target);
    }

    #[test]
    fn prop_below_is_inclusive_le(target in finite_price(), current in finite_price()) {
        prop_assert_eq!(evaluate(&AlertCondition::Below, target, current), current <= target);
    }

    #[test]
    fn prop_unrecognized_never_matches(
        raw in "[A-Za-z_]{0,12}",
        target in finite_price(),
        current in finite_price(),
    ) {
        let condition = AlertCondition::parse(&raw);
        prop_assume!(!condition.is_recognized());
        prop_assert!(!evaluate(&condition, target, current));
    }

    #[test]
    fn prop_equal_price_matches_both_directions(price in finite_price()) {
        prop_assert!(evaluate(&AlertCondition::Above, price, price));
        prop_assert!(evaluate(&AlertCondition::Below, price, price));
    }
}
