//! Overflow-safe integer conversions for byte counters crossing OS
//! boundaries (cgroup files report u64, several consumer APIs take i64).

/// Convert a `u64` byte count to `i64`, capping at `i64::MAX` instead of
/// wrapping.
pub fn u64_to_i64_saturating(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Convert a `u128` (e.g. `Duration::as_millis`) to `u64`, capping at
/// `u64::MAX`.
pub fn u128_to_u64_saturating(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_max_caps_at_i64_max() {
        assert_eq!(u64_to_i64_saturating(u64::MAX), i64::MAX);
    }

    #[test]
    fn small_values_pass_through() {
        assert_eq!(u64_to_i64_saturating(42), 42);
        assert_eq!(u128_to_u64_saturating(42), 42);
    }

    #[test]
    fn u128_caps_at_u64_max() {
        assert_eq!(u128_to_u64_saturating(u128::MAX), u64::MAX);
    }
}
