use proptest::prelude::*;

use coffer_types::{format_units, Timestamp, U256};

proptest! {
    /// Timestamp ordering follows the underlying millisecond value.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::from_millis(a);
        let tb = Timestamp::from_millis(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }

    /// Removing the decimal point from a formatted amount recovers the raw
    /// digits (modulo padding zeros).
    #[test]
    fn format_units_preserves_digits(raw in 0u128..u128::MAX, decimals in 0u8..30) {
        let rendered = format_units(U256::from(raw), decimals);
        let (whole, fraction) = rendered.split_once('.').expect("always has a point");
        let mut fraction = fraction.to_string();
        while fraction.len() < decimals as usize {
            fraction.push('0');
        }
        if decimals == 0 {
            prop_assert_eq!(fraction.as_str(), "0");
            prop_assert_eq!(whole.parse::<u128>().unwrap(), raw);
        } else {
            let digits = format!("{whole}{fraction}");
            prop_assert_eq!(digits.parse::<u128>().unwrap(), raw);
        }
    }

    /// Expiry is monotone: once expired, later instants stay expired.
    #[test]
    fn expiry_is_monotone(seen in 0u64..1_000_000, lifetime in 0u64..1_000_000, now in 0u64..3_000_000) {
        let seen = Timestamp::from_millis(seen);
        let lifetime = std::time::Duration::from_millis(lifetime);
        if seen.has_expired(lifetime, Timestamp::from_millis(now)) {
            prop_assert!(seen.has_expired(lifetime, Timestamp::from_millis(now + 1)));
        }
    }
}
