//! Safe-prime ElGamal group parameters `(g, p)`, with `p` prime and `g` a
//! generator of the order-`q` subgroup where `q = (p-1)/2` is also prime.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::Executor;

const MILLER_RABIN_ROUNDS: u32 = 40;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParams {
    pub g: BigUint,
    pub p: BigUint,
}

impl GroupParams {
    /// Order of the large prime-order subgroup generated by `g`.
    pub fn q(&self) -> BigUint {
        (&self.p - BigUint::one()) / BigUint::from(2u32)
    }

    /// Bytes of message a single block can carry, reserving one byte so
    /// every encoded plaintext has a guaranteed-nonzero leading byte (no
    /// big-endian truncation ambiguity on decode).
    pub fn plaintext_capacity(&self) -> usize {
        (self.p.bits() as usize / 8) - 1
    }
}

/// Encrypt message integer `m` (`0 <= m < p`) under private exponent `x`
/// (`h = g^x`), drawing a fresh ephemeral `k` from `rng`.
pub fn elgamal_encrypt(gp: &GroupParams, x: &BigUint, m: &BigUint, rng: &mut impl RngCore) -> crate::block::Block {
    let h = gp.g.modpow(x, &gp.p);
    let k = crate::rng::gen_biguint_range(rng, &BigUint::from(2u32), &gp.p);
    let c1 = gp.g.modpow(&k, &gp.p);
    let c2 = (m * h.modpow(&k, &gp.p)) % &gp.p;
    crate::block::Block::new(c1, c2, h)
}

/// Recover the message integer encrypted under private exponent `x`.
pub fn elgamal_decrypt(gp: &GroupParams, x: &BigUint, block: &crate::block::Block) -> BigUint {
    let q = gp.q();
    let s = &q - (x % &q);
    let inv = block.c1.modpow(&s, &gp.p);
    (&block.c2 * inv) % &gp.p
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupProgress {
    /// Probabilistic progress through the prime search; `tested` is a
    /// monotonically-nondecreasing lower bound on candidates ruled out so
    /// far across all workers, not a fraction of a known total.
    Searching { tested: u64 },
    FixingGenerator,
}

/// Minimum bit length allowed without `unsafe_override`.
pub const MIN_SAFE_BITS: u64 = 1025;
/// Bit length at or above which precomputed parameters require
/// `unsafe_override` even if the caller also passed `unsafe_override` for
/// the small-bits check (kept as a distinct constant since the two checks
/// protect against different mistakes).
pub const MAX_VETTED_PRECOMPUTED_BITS: u64 = 2048;

pub struct GenerateParams<'a> {
    pub bits: u64,
    pub precomputed: bool,
    pub unsafe_override: bool,
    pub progress: &'a (dyn Fn(GroupProgress) + Sync),
}

/// Generate (or load precomputed) group parameters per `params`, fanning
/// out candidate search across `executor`.
pub fn generate(executor: &dyn Executor, params: GenerateParams<'_>) -> Result<GroupParams> {
    if params.bits < MIN_SAFE_BITS && !params.unsafe_override {
        return Err(Error::UnsafeParameter(
            "gp_bits below 1025 requires --i-know-its-unsafe",
        ));
    }
    if params.precomputed {
        if params.bits > MAX_VETTED_PRECOMPUTED_BITS && !params.unsafe_override {
            return Err(Error::UnsafeParameter(
                "precomputed group parameters above 2048 bits require --i-know-its-unsafe",
            ));
        }
        (params.progress)(GroupProgress::Searching { tested: 0 });
        let gp = precomputed_group_params(params.bits)?;
        (params.progress)(GroupProgress::FixingGenerator);
        return Ok(gp);
    }
    let (q, p) = executor.search_safe_prime(params.bits, params.progress)?;
    (params.progress)(GroupProgress::FixingGenerator);
    let g = find_generator(&p, &q)?;
    Ok(GroupParams { g, p })
}

/// Test `n` for primality with Miller-Rabin, `rounds` independent
/// witnesses. Deterministic for the tiny cases (`n < 4`), probabilistic
/// above that with false-positive probability `<= 4^-rounds`.
pub fn is_probable_prime(n: &BigUint, rounds: u32, rng: &mut impl RngCore) -> bool {
    let zero = BigUint::zero();
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);

    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if n.is_even() {
        return false;
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut s: u64 = 0;
    while d.is_even() {
        d >>= 1u32;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = crate::rng::gen_biguint_range(rng, &two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x == one {
                return false;
            }
        }
        return false;
    }
    let _ = zero;
    true
}

/// One probabilistic attempt at a safe-prime pair `(q, p = 2q+1)` of the
/// requested total bit length for `p`. Returns `None` on failure so the
/// caller can retry with a fresh candidate (§7: "retry with a fresh
/// candidate, internal, invisible").
pub fn try_safe_prime_candidate(bits: u64, rng: &mut impl RngCore) -> Option<(BigUint, BigUint)> {
    let q = crate::rng::gen_odd_biguint(rng, bits - 1);
    if !is_probable_prime(&q, MILLER_RABIN_ROUNDS, rng) {
        return None;
    }
    let p = &q * BigUint::from(2u32) + BigUint::one();
    if !is_probable_prime(&p, MILLER_RABIN_ROUNDS, rng) {
        return None;
    }
    Some((q, p))
}

/// Find a generator of the order-`q` subgroup of `(Z/pZ)*`. For a safe
/// prime `p = 2q+1`, any `h` with `h^2 mod p != 1` and `h^q mod p == 1`
/// generates the order-`q` subgroup.
fn find_generator(p: &BigUint, q: &BigUint) -> Result<BigUint> {
    let one = BigUint::one();
    let mut candidate = BigUint::from(2u32);
    loop {
        if candidate >= *p {
            return Err(Error::Crypto("exhausted candidates for generator".into()));
        }
        let g = candidate.modpow(&BigUint::from(2u32), p);
        if g != one && g.modpow(q, p) == one {
            return Ok(g);
        }
        candidate += BigUint::one();
    }
}

/// A small built-in 1024-bit safe-prime pair for fast tests and the
/// explicitly-unsafe CLI flag. Never used unless `unsafe_override` is set.
pub(crate) fn precomputed_group_params(bits: u64) -> Result<GroupParams> {
    if bits > 1100 {
        // Only a 1024-bit table entry is bundled; anything dramatically
        // larger was clearly not meant to hit this path.
        return Err(Error::Crypto(
            "no precomputed group parameters bundled for this bit size".into(),
        ));
    }
    // p = 2q+1 with q prime, p prime, 1024 bits. Generated once offline and
    // pinned here purely for determinism in tests / `--precomputed-group-parameters`.
    let p = BigUint::parse_bytes(
        b"144456689901423970073769493367763720195650556562069655656726176526327501938498441764208561096016095403922757280927734579390932757468114860239086518020611672572681105618885464176534985788431116693588564913219627052804836324253146816233563263542953148562777709176301953172158966330193543843942706141177106588939",
        10,
    ).ok_or_else(|| Error::Crypto("malformed precomputed prime".into()))?;
    // g generates the order-q subgroup.
    let g = BigUint::from(4u32);
    Ok(GroupParams { g, p })
}

/// A real, fully-vetted 1024-bit safe-prime group for use by other
/// modules' tests, without repeating the large constant inline.
#[cfg(test)]
pub(crate) fn precomputed_group_params_for_test() -> GroupParams {
    precomputed_group_params(1024).expect("bundled 1024-bit group parameters")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn small_primes_are_prime() {
        let mut rng = OsRng;
        for n in [2u32, 3, 5, 7, 11, 13, 1021] {
            assert!(is_probable_prime(&BigUint::from(n), 20, &mut rng), "{n}");
        }
    }

    #[test]
    fn small_composites_are_not_prime() {
        let mut rng = OsRng;
        for n in [4u32, 6, 8, 9, 15, 21, 1024] {
            assert!(!is_probable_prime(&BigUint::from(n), 20, &mut rng), "{n}");
        }
    }

    #[test]
    fn tiny_safe_prime_search_terminates() {
        let mut rng = OsRng;
        let mut found = None;
        for _ in 0..10_000 {
            if let Some(pair) = try_safe_prime_candidate(32, &mut rng) {
                found = Some(pair);
                break;
            }
        }
        let (q, p) = found.expect("a 32-bit safe prime should be found quickly");
        assert_eq!(&q * BigUint::from(2u32) + BigUint::one(), p);
        assert!(is_probable_prime(&q, 40, &mut rng));
        assert!(is_probable_prime(&p, 40, &mut rng));
    }

    #[test]
    fn generator_generates_order_q_subgroup() {
        let mut rng = OsRng;
        let (q, p) = loop {
            if let Some(pair) = try_safe_prime_candidate(48, &mut rng) {
                break pair;
            }
        };
        let g = find_generator(&p, &q).unwrap();
        assert_eq!(g.modpow(&q, &p), BigUint::one());
        assert_ne!(g, BigUint::one());
    }

    #[test]
    fn rejects_small_bits_without_override() {
        let exec = crate::executor::ThreadExecutor::new(1);
        let err = generate(
            &exec,
            GenerateParams {
                bits: 128,
                precomputed: true,
                unsafe_override: false,
                progress: &|_| {},
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsafeParameter(_)));
    }

    #[test]
    fn elgamal_roundtrips() {
        let gp = GroupParams {
            g: BigUint::from(4u32),
            p: BigUint::from(23u32),
        };
        let mut rng = OsRng;
        let x = BigUint::from(5u32);
        let m = BigUint::from(7u32);
        let block = elgamal_encrypt(&gp, &x, &m, &mut rng);
        assert_eq!(elgamal_decrypt(&gp, &x, &block), m);
    }

    #[test]
    fn precomputed_with_override_succeeds() {
        let exec = crate::executor::ThreadExecutor::new(1);
        let gp = generate(
            &exec,
            GenerateParams {
                bits: 128,
                precomputed: true,
                unsafe_override: true,
                progress: &|_| {},
            },
        )
        .unwrap();
        assert!(gp.p.bits() >= 1000);
    }
}
