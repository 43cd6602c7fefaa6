//! The homomorphic refresh applied to every block on every write. This
//! module holds only the pure per-block math; fan-out across blocks lives
//! in `executor`.

use num_bigint::BigUint;
use rand::RngCore;

use crate::block::Block;
use crate::group::GroupParams;

/// Rerandomize one block: `c1 <- c1 * g^s`, `c2 <- c2 * h^s`, `h` unchanged,
/// for a fresh random `s in [2, p)`. Decryption under any `x` with
/// `h = g^x` is unaffected.
pub fn rerandomize_block(block: &Block, gp: &GroupParams, rng: &mut impl RngCore) -> Block {
    let two = BigUint::from(2u32);
    let s = crate::rng::gen_biguint_range(rng, &two, &gp.p);
    let c1 = (&block.c1 * gp.g.modpow(&s, &gp.p)) % &gp.p;
    let c2 = (&block.c2 * block.h.modpow(&s, &gp.p)) % &gp.p;
    Block::new(c1, c2, block.h.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn toy_group() -> GroupParams {
        // p = 23 is prime, (p-1)/2 = 11 is prime: a genuine (tiny, unsafe)
        // safe-prime group, large enough to exercise the math without the
        // cost of a real search.
        GroupParams {
            g: BigUint::from(4u32),
            p: BigUint::from(23u32),
        }
    }

    fn encrypt(gp: &GroupParams, x: &BigUint, m: &BigUint, rng: &mut impl RngCore) -> Block {
        let h = gp.g.modpow(x, &gp.p);
        let k = crate::rng::gen_biguint_range(rng, &BigUint::from(2u32), &gp.p);
        let c1 = gp.g.modpow(&k, &gp.p);
        let c2 = (m * h.modpow(&k, &gp.p)) % &gp.p;
        Block::new(c1, c2, h)
    }

    fn decrypt(gp: &GroupParams, x: &BigUint, b: &Block) -> BigUint {
        let s = gp.q() - x % gp.q();
        let inv = b.c1.modpow(&s, &gp.p);
        (&b.c2 * inv) % &gp.p
    }

    #[test]
    fn rerandomize_preserves_plaintext() {
        let gp = toy_group();
        let mut rng = OsRng;
        let x = BigUint::from(5u32);
        let m = BigUint::from(7u32);
        let block = encrypt(&gp, &x, &m, &mut rng);
        let refreshed = rerandomize_block(&block, &gp, &mut rng);
        assert_eq!(refreshed.h, block.h);
        assert_eq!(decrypt(&gp, &x, &refreshed), m);
    }

    #[test]
    fn repeated_rerandomization_usually_moves_the_ciphertext() {
        let gp = toy_group();
        let mut rng = OsRng;
        let x = BigUint::from(5u32);
        let m = BigUint::from(7u32);
        let block = encrypt(&gp, &x, &m, &mut rng);
        let saw_change = (0..20).any(|_| {
            let refreshed = rerandomize_block(&block, &gp, &mut rng);
            refreshed.c1 != block.c1 || refreshed.c2 != block.c2
        });
        assert!(saw_change);
    }
}
