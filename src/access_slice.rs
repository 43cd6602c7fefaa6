//! The anchor block's plaintext payload: a self-delimiting header naming a
//! container's capability, its chain of payload block indices, and the
//! symmetric keys that capability is owed.

use rand::RngCore;

use crate::error::{Error, Result};

pub const AS_MAGIC: u32 = 0x1a1a_8ad7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Full,
    ListOnly,
    AppendOnly,
}

impl Capability {
    fn to_byte(self) -> u8 {
        match self {
            Capability::Full => 0,
            Capability::ListOnly => 1,
            Capability::AppendOnly => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Capability::Full),
            1 => Some(Capability::ListOnly),
            2 => Some(Capability::AppendOnly),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccessSlice {
    pub kind: Capability,
    /// Display id, shared verbatim across every capability's anchor for
    /// the same logical container (derived once, at creation, from the
    /// container's master password).
    pub id: [u8; 4],
    /// Payload block indices in chain order.
    pub chain: Vec<u64>,
    pub list_key: Option<[u8; 32]>,
    pub secret_key: Option<[u8; 32]>,
    pub append_key: Option<[u8; 32]>,
}

impl AccessSlice {
    pub fn full(id: [u8; 4], chain: Vec<u64>, list_key: [u8; 32], secret_key: [u8; 32], append_key: [u8; 32]) -> Self {
        AccessSlice {
            kind: Capability::Full,
            id,
            chain,
            list_key: Some(list_key),
            secret_key: Some(secret_key),
            append_key: Some(append_key),
        }
    }

    pub fn list_only(id: [u8; 4], chain: Vec<u64>, list_key: [u8; 32]) -> Self {
        AccessSlice {
            kind: Capability::ListOnly,
            id,
            chain,
            list_key: Some(list_key),
            secret_key: None,
            append_key: None,
        }
    }

    pub fn append_only(id: [u8; 4], chain: Vec<u64>, append_key: [u8; 32]) -> Self {
        AccessSlice {
            kind: Capability::AppendOnly,
            id,
            chain,
            list_key: None,
            secret_key: None,
            append_key: Some(append_key),
        }
    }

    /// Encode to exactly `capacity` bytes, random-padded. `block_index_size`
    /// is the number of bytes used per chain entry (1, 2, or 4); a stored
    /// entry is `index + 1` so that the all-zero terminator never collides
    /// with a real index 0.
    pub fn encode(&self, block_index_size: u8, capacity: usize, rng: &mut impl RngCore) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&AS_MAGIC.to_be_bytes());
        out.push(self.kind.to_byte());
        out.extend_from_slice(&self.id);
        for &idx in &self.chain {
            write_index(&mut out, idx + 1, block_index_size)?;
        }
        write_index(&mut out, 0, block_index_size)?;
        match self.kind {
            Capability::Full => {
                out.extend_from_slice(&self.list_key.ok_or_else(missing_key)?);
                out.extend_from_slice(&self.secret_key.ok_or_else(missing_key)?);
                out.extend_from_slice(&self.append_key.ok_or_else(missing_key)?);
            }
            Capability::ListOnly => {
                out.extend_from_slice(&self.list_key.ok_or_else(missing_key)?);
            }
            Capability::AppendOnly => {
                out.extend_from_slice(&self.append_key.ok_or_else(missing_key)?);
            }
        }
        if out.len() > capacity {
            return Err(Error::Crypto("access slice does not fit in one block".into()));
        }
        let mut pad = vec![0u8; capacity - out.len()];
        crate::rng::fill_bytes(rng, &mut pad);
        out.extend_from_slice(&pad);
        Ok(out)
    }

    /// Parse a candidate anchor plaintext. Returns `None` (not an error)
    /// whenever the bytes don't describe a well-formed access slice —
    /// routine during anchor discovery, where most blocks are free.
    pub fn decode(bytes: &[u8], block_index_size: u8) -> Option<Self> {
        if bytes.len() < 5 {
            return None;
        }
        let magic = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        if magic != AS_MAGIC {
            return None;
        }
        let kind = Capability::from_byte(bytes[4])?;
        if bytes.len() < 9 {
            return None;
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[5..9]);
        let mut pos = 9usize;
        let mut chain = Vec::new();
        loop {
            let raw = read_index(bytes, &mut pos, block_index_size)?;
            if raw == 0 {
                break;
            }
            chain.push(raw - 1);
        }
        let take_key = |bytes: &[u8], pos: &mut usize| -> Option<[u8; 32]> {
            if bytes.len() < *pos + 32 {
                return None;
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes[*pos..*pos + 32]);
            *pos += 32;
            Some(key)
        };
        let slice = match kind {
            Capability::Full => {
                let list_key = take_key(bytes, &mut pos)?;
                let secret_key = take_key(bytes, &mut pos)?;
                let append_key = take_key(bytes, &mut pos)?;
                AccessSlice::full(id, chain, list_key, secret_key, append_key)
            }
            Capability::ListOnly => {
                let list_key = take_key(bytes, &mut pos)?;
                AccessSlice::list_only(id, chain, list_key)
            }
            Capability::AppendOnly => {
                let append_key = take_key(bytes, &mut pos)?;
                AccessSlice::append_only(id, chain, append_key)
            }
        };
        Some(slice)
    }
}

fn missing_key() -> Error {
    Error::Crypto("access slice missing a key required by its capability".into())
}

fn write_index(out: &mut Vec<u8>, val: u64, size: u8) -> Result<()> {
    match size {
        1 => {
            let v: u8 = val
                .try_into()
                .map_err(|_| Error::Crypto("block index does not fit in 1 byte".into()))?;
            out.push(v);
        }
        2 => {
            let v: u16 = val
                .try_into()
                .map_err(|_| Error::Crypto("block index does not fit in 2 bytes".into()))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        4 => {
            let v: u32 = val
                .try_into()
                .map_err(|_| Error::Crypto("block index does not fit in 4 bytes".into()))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        _ => return Err(Error::Crypto("block-index-size must be 1, 2, or 4".into())),
    }
    Ok(())
}

fn read_index(bytes: &[u8], pos: &mut usize, size: u8) -> Option<u64> {
    let size = size as usize;
    if bytes.len() < *pos + size {
        return None;
    }
    let slice = &bytes[*pos..*pos + size];
    *pos += size;
    let mut buf = [0u8; 8];
    buf[8 - size..].copy_from_slice(slice);
    Some(u64::from_be_bytes(buf))
}
