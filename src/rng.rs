//! Explicit-handle helpers over the OS CSPRNG. Nothing here reads or writes
//! hidden global state: every caller that needs randomness is handed a
//! `&mut impl RngCore` (or draws its own fresh `OsRng`, which is itself
//! stateless beyond the kernel's entropy pool).

use num_bigint::{BigUint, RandBigInt};
use rand::{rngs::OsRng, RngCore};

/// Uniformly sample `x` with `lo <= x < hi`.
pub fn gen_biguint_range(rng: &mut impl RngCore, lo: &BigUint, hi: &BigUint) -> BigUint {
    rng.gen_biguint_range(lo, hi)
}

/// Sample an odd integer with exactly `bits` bits set in its top position
/// (i.e. in `[2^(bits-1), 2^bits)`), with the low bit forced to 1.
pub fn gen_odd_biguint(rng: &mut impl RngCore, bits: u64) -> BigUint {
    let mut n = rng.gen_biguint(bits);
    n.set_bit(bits - 1, true);
    n.set_bit(0, true);
    n
}

pub fn fill_bytes(rng: &mut impl RngCore, buf: &mut [u8]) {
    rng.fill_bytes(buf);
}

pub fn fresh() -> OsRng {
    OsRng
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    #[test]
    fn gen_biguint_range_stays_in_bounds() {
        let mut rng = fresh();
        let lo = BigUint::from(2u32);
        let hi = BigUint::from(1000u32);
        for _ in 0..50 {
            let x = gen_biguint_range(&mut rng, &lo, &hi);
            assert!(x >= lo && x < hi);
        }
    }

    #[test]
    fn gen_odd_biguint_has_top_and_low_bit_set() {
        let mut rng = fresh();
        let n = gen_odd_biguint(&mut rng, 64);
        assert!(!n.is_zero());
        assert!(n.bit(63));
        assert!(n.bit(0));
    }
}
