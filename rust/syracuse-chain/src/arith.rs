/// Modular arithmetic primitives and the accelerated Syracuse step.

use num_integer::Integer;

/// Modular exponentiation: base^exp mod m using binary method.
pub fn mod_pow(mut base: u64, mut exp: u64, m: u64) -> u64 {
    if m == 1 {
        return 0;
    }
    let mut result = 1u128;
    let m = m as u128;
    base %= m as u64;
    let mut b = base as u128;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        exp >>= 1;
        b = b * b % m;
    }
    result as u64
}

/// Modular inverse: a^{-1} mod m. Returns None if gcd(a,m) != 1.
pub fn mod_inv(a: u64, m: u64) -> Option<u64> {
    let m = m as i128;
    let e = (a as i128).extended_gcd(&m);
    if e.gcd != 1 {
        return None;
    }
    Some(e.x.rem_euclid(m) as u64)
}

/// 3^k as u64. Caller guarantees k ≤ 40.
#[inline]
pub fn pow3(k: u32) -> u64 {
    3u64.pow(k)
}

/// 2-adic valuation of a non-zero integer.
#[inline]
pub fn v2(x: u128) -> u32 {
    debug_assert!(x != 0, "v2(0) is undefined");
    x.trailing_zeros()
}

/// 3-adic valuation of a non-zero integer.
pub fn v3(mut x: u64) -> u32 {
    debug_assert!(x != 0, "v3(0) is undefined");
    let mut v = 0;
    while x % 3 == 0 {
        x /= 3;
        v += 1;
    }
    v
}

/// One accelerated odd step x ↦ (3x+1)/2^a with a = v2(3x+1).
///
/// Returns `(next, a)`, or `None` if 3x+1 does not fit in a u128.
#[inline]
pub fn syracuse_step(x: u128) -> Option<(u128, u32)> {
    let m = x.checked_mul(3)?.checked_add(1)?;
    let a = v2(m);
    Some((m >> a, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_pow_small() {
        assert_eq!(mod_pow(2, 6, 9), 1);
        assert_eq!(mod_pow(2, 3, 9), 8);
        assert_eq!(mod_pow(5, 0, 7), 1);
        assert_eq!(mod_pow(5, 3, 1), 0);
    }

    #[test]
    fn test_mod_inv() {
        assert_eq!(mod_inv(2, 9), Some(5));
        assert_eq!(mod_inv(2, 243).map(|i| i * 2 % 243), Some(1));
        assert_eq!(mod_inv(3, 9), None);
    }

    #[test]
    fn test_valuations() {
        assert_eq!(v2(1), 0);
        assert_eq!(v2(40), 3);
        assert_eq!(v3(1), 0);
        assert_eq!(v3(54), 3);
        assert_eq!(v3(81), 4);
    }

    #[test]
    fn test_syracuse_step() {
        // 3·27+1 = 82 = 2·41
        assert_eq!(syracuse_step(27), Some((41, 1)));
        // 3·5+1 = 16
        assert_eq!(syracuse_step(5), Some((1, 4)));
        assert_eq!(syracuse_step(1), Some((1, 2)));
        assert_eq!(syracuse_step(u128::MAX / 2), None);
    }

    #[test]
    fn test_syracuse_image_never_divisible_by_three() {
        for x in (1u128..2000).step_by(2) {
            let (next, _) = syracuse_step(x).unwrap();
            assert_ne!(next % 3, 0, "T({x}) = {next} divisible by 3");
            assert_eq!(next % 2, 1);
        }
    }
}
