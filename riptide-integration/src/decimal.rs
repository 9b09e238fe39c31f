use rust_decimal::{Decimal, RoundingStrategy};

/// Round half-up (midpoint away from zero) to `dp` decimal places.
///
/// The default rounding mode for the trading path; any other mode must be
/// chosen explicitly at the call site.
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Division returning `None` on a zero denominator instead of panicking.
pub fn checked_div(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        None
    } else {
        numerator.checked_div(denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_up() {
        struct TestCase {
            input: Decimal,
            dp: u32,
            expected: Decimal,
        }

        let cases = vec![
            TestCase {
                input: dec!(1.005),
                dp: 2,
                expected: dec!(1.01),
            },
            TestCase {
                input: dec!(1.004),
                dp: 2,
                expected: dec!(1.00),
            },
            TestCase {
                input: dec!(-1.005),
                dp: 2,
                expected: dec!(-1.01),
            },
            TestCase {
                input: dec!(50198),
                dp: 8,
                expected: dec!(50198),
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(round_half_up(test.input, test.dp), test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_checked_div() {
        assert_eq!(checked_div(dec!(10), dec!(4)), Some(dec!(2.5)));
        assert_eq!(checked_div(dec!(10), Decimal::ZERO), None);
    }
}
