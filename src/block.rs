//! Fixed-size, order-preserving array of ElGamal ciphertext triples. This
//! layer has no semantic interpretation of block contents: it is pure
//! indexed storage, as specified.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// One ElGamal ciphertext triple: `(c1, c2)` is the ciphertext, `h` is the
/// ephemeral public share chosen by whoever last wrote the block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub c1: BigUint,
    pub c2: BigUint,
    pub h: BigUint,
}

impl Block {
    pub fn new(c1: BigUint, c2: BigUint, h: BigUint) -> Self {
        Block { c1, c2, h }
    }
}

/// Random-access addressable store of exactly `len()` blocks.
#[derive(Clone, Debug)]
pub struct BlockStore {
    blocks: Vec<Block>,
}

impl BlockStore {
    pub fn new(blocks: Vec<Block>) -> Self {
        BlockStore { blocks }
    }

    pub fn get(&self, i: usize) -> &Block {
        &self.blocks[i]
    }

    pub fn set(&mut self, i: usize, b: Block) {
        self.blocks[i] = b;
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn as_slice(&self) -> &[Block] {
        &self.blocks
    }

    pub fn replace_all(&mut self, blocks: Vec<Block>) {
        debug_assert_eq!(blocks.len(), self.blocks.len());
        self.blocks = blocks;
    }
}

pub fn biguint_to_hex(n: &BigUint) -> String {
    hex::encode(n.to_bytes_be())
}

pub fn biguint_from_hex(s: &str) -> Result<BigUint, hex::FromHexError> {
    Ok(BigUint::from_bytes_be(&hex::decode(s)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_preserve_others() {
        let mut store = BlockStore::new(vec![
            Block::new(1u32.into(), 1u32.into(), 1u32.into()),
            Block::new(2u32.into(), 2u32.into(), 2u32.into()),
        ]);
        store.set(0, Block::new(9u32.into(), 9u32.into(), 9u32.into()));
        assert_eq!(store.get(0).c1, BigUint::from(9u32));
        assert_eq!(store.get(1).c1, BigUint::from(2u32));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn hex_roundtrip() {
        let n = BigUint::from(123456789u64);
        assert_eq!(biguint_from_hex(&biguint_to_hex(&n)).unwrap(), n);
    }
}
