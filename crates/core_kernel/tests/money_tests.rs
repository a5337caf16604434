//! Unit tests for the Money and VatRate types
//!
//! Tests cover creation, penny rounding, arithmetic, VAT and parsing.

use core_kernel::{round_pence, Money, MoneyError, VatRate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_keeps_full_precision() {
        let m = Money::new(dec!(0.4225));
        assert_eq!(m.amount(), dec!(0.4225));
    }

    #[test]
    fn test_pounds_rounds_to_pence() {
        assert_eq!(Money::pounds(dec!(100.125)).amount(), dec!(100.13));
        assert_eq!(Money::pounds(dec!(100.124)).amount(), dec!(100.12));
    }

    #[test]
    fn test_from_pence() {
        assert_eq!(Money::from_pence(91680).amount(), dec!(916.80));
        assert_eq!(Money::from_pence(-5).amount(), dec!(-0.05));
    }

    #[test]
    fn test_zero_and_default_agree() {
        assert_eq!(Money::default(), Money::ZERO);
        assert!(Money::ZERO.is_zero());
        assert!(!Money::ZERO.is_positive());
        assert!(!Money::ZERO.is_negative());
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_midpoints_round_away_from_zero() {
        assert_eq!(round_pence(dec!(2.345)), dec!(2.35));
        assert_eq!(round_pence(dec!(2.355)), dec!(2.36));
        assert_eq!(round_pence(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_times_rounds_the_product() {
        // 20 minutes at 75.00/h
        let hours = Decimal::from(20) / Decimal::from(60);
        assert_eq!(Money::new(dec!(75)).times(hours).amount(), dec!(25.00));
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_add_and_sub() {
        let a = Money::pounds(dec!(750));
        let b = Money::pounds(dec!(16.80));
        assert_eq!((a + b).amount(), dec!(766.80));
        assert_eq!((a - b).amount(), dec!(733.20));
        assert_eq!((-b).amount(), dec!(-16.80));
    }

    #[test]
    fn test_sum_of_owned_and_borrowed() {
        let amounts = vec![Money::from_pence(100), Money::from_pence(250)];
        let owned: Money = amounts.iter().copied().sum();
        let borrowed: Money = amounts.iter().sum();
        assert_eq!(owned, borrowed);
        assert_eq!(owned.amount(), dec!(3.50));
    }

    #[test]
    fn test_checked_operations() {
        let a = Money::pounds(dec!(10));
        assert_eq!(a.checked_add(&a).unwrap().amount(), dec!(20));
        assert_eq!(a.checked_sub(&a).unwrap(), Money::ZERO);
        let max = Money::new(Decimal::MAX);
        assert_eq!(max.checked_add(&a), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_ordering() {
        assert!(Money::pounds(dec!(500)) > Money::pounds(dec!(376.80)));
    }
}

mod vat {
    use super::*;

    #[test]
    fn test_vat_on_rounded_net() {
        let net = Money::pounds(dec!(33.33));
        assert_eq!(VatRate::standard().vat_on(net).amount(), dec!(6.67));
        assert_eq!(VatRate::standard().gross(net).amount(), dec!(40.00));
    }

    #[test]
    fn test_reduced_rate() {
        let rate = VatRate::percent(dec!(5));
        assert_eq!(rate.vat_on(Money::pounds(dec!(100))).amount(), dec!(5.00));
        assert_eq!(rate.as_percentage(), dec!(5));
    }

    #[test]
    fn test_zero_rate() {
        assert!(VatRate::ZERO.is_zero());
        assert_eq!(VatRate::ZERO.vat_on(Money::pounds(dec!(16.80))), Money::ZERO);
        assert_eq!(VatRate::ZERO.to_string(), "0%");
    }
}

mod parsing {
    use super::*;

    #[test]
    fn test_parse_valid() {
        assert_eq!(Money::parse(" 500.00 ").unwrap().amount(), dec!(500.00));
        assert_eq!(Money::parse("12.345").unwrap().amount(), dec!(12.35));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(Money::parse("five hundred"), Err(MoneyError::InvalidAmount(_))));
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&Money::pounds(dec!(16.80))).unwrap();
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount(), dec!(16.80));
    }
}
