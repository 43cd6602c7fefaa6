//! One unlocked container: its capability, the chain of payload blocks that
//! back it, and the entries those blocks decrypt to. A `Container` is a
//! plain value — it borrows nothing from `Safe` — so callers are free to
//! inspect and mutate it in memory before handing it back to
//! `Safe::save_container` to persist.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::access_slice::{AccessSlice, Capability};
use crate::block::Block;
use crate::error::{Error, Result};
use crate::group::GroupParams;
use crate::hash::{self, Tag};

/// One payload entry as seen by a caller. `secret` is populated only when
/// the capability that produced it can read secrets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub note: String,
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct MainEntry {
    key: String,
    note: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AppendEntry {
    key: String,
    note: String,
    secret: String,
}

/// A byte tagged onto the front of every payload block's plaintext so the
/// leading byte is always nonzero: big-endian decode/encode of the
/// underlying `BigUint` can never silently drop or need to restore a
/// leading zero.
const PAYLOAD_TAG: u8 = 0xff;

pub struct Container {
    pub id: [u8; 4],
    kind: Capability,
    anchor_index: u64,
    chain: Vec<u64>,
    base_key: Zeroizing<Vec<u8>>,
    list_key: Option<[u8; 32]>,
    secret_key: Option<[u8; 32]>,
    append_key: Option<[u8; 32]>,
    main_data: Vec<MainEntry>,
    secret_data: Vec<String>,
    append_data: Vec<AppendEntry>,
    dirty: bool,
}

impl Container {
    pub fn kind(&self) -> Capability {
        self.kind
    }

    pub fn can_list(&self) -> bool {
        !matches!(self.kind, Capability::AppendOnly)
    }

    pub fn can_add(&self) -> bool {
        !matches!(self.kind, Capability::ListOnly)
    }

    pub fn can_read_secrets(&self) -> bool {
        matches!(self.kind, Capability::Full)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn anchor_index(&self) -> u64 {
        self.anchor_index
    }

    pub fn chain(&self) -> &[u64] {
        &self.chain
    }

    /// List every entry this capability can see. `with_secrets` is honored
    /// only when `can_read_secrets()`; otherwise every `secret` is `None`.
    pub fn list(&self, with_secrets: bool) -> Result<Vec<Entry>> {
        if !self.can_list() {
            return Err(Error::MissingKey);
        }
        let reveal_secrets = with_secrets && self.can_read_secrets();
        Ok(self
            .main_data
            .iter()
            .enumerate()
            .map(|(i, m)| Entry {
                key: m.key.clone(),
                note: m.note.clone(),
                secret: if reveal_secrets {
                    self.secret_data.get(i).cloned()
                } else {
                    None
                },
            })
            .collect())
    }

    /// Every entry whose key equals `key`, secrets included. Empty (not an
    /// error) if nothing matches; `Err(MissingKey)` if this capability
    /// cannot read secrets at all.
    pub fn get(&self, key: &str) -> Result<Vec<Entry>> {
        if !self.can_read_secrets() {
            return Err(Error::MissingKey);
        }
        Ok(self
            .main_data
            .iter()
            .enumerate()
            .filter(|(_, m)| m.key == key)
            .map(|(i, m)| Entry {
                key: m.key.clone(),
                note: m.note.clone(),
                secret: self.secret_data.get(i).cloned(),
            })
            .collect())
    }

    /// Add an entry. Permitted for `Full` (lands directly in the visible
    /// data) and `AppendOnly` (staged in `append_data` until the next
    /// `Full` open migrates it).
    pub fn add(&mut self, key: String, note: String, secret: String) -> Result<()> {
        if !self.can_add() {
            return Err(Error::MissingKey);
        }
        match self.kind {
            Capability::Full => {
                self.main_data.push(MainEntry { key, note });
                self.secret_data.push(secret);
            }
            Capability::AppendOnly => {
                self.append_data.push(AppendEntry { key, note, secret });
            }
            Capability::ListOnly => unreachable!("can_add() excludes ListOnly"),
        }
        self.dirty = true;
        Ok(())
    }

    /// Number of payload blocks this container's segments currently need,
    /// at `gp`'s block capacity.
    pub fn required_chain_len(&self, gp: &GroupParams) -> Result<usize> {
        let cap = gp.plaintext_capacity().saturating_sub(1);
        if cap == 0 {
            return Err(Error::Crypto("group parameters too small to carry any payload".into()));
        }
        let bytes = self.encode_payload()?;
        Ok(bytes.len().div_ceil(cap))
    }

    /// Re-seal every segment this capability owns and split the result
    /// across `self.chain`. The caller (`Safe`) is responsible for ensuring
    /// `self.chain` is already long enough (see `required_chain_len`) and
    /// for writing the returned blocks back into the block store at those
    /// indices, plus re-encoding and rewriting the anchor if the chain
    /// grew.
    pub fn seal_chain(&mut self, gp: &GroupParams, rng: &mut impl RngCore) -> Result<Vec<(u64, Block)>> {
        let bytes = self.encode_payload()?;
        let cap = gp.plaintext_capacity().saturating_sub(1);
        if cap == 0 {
            return Err(Error::Crypto("group parameters too small to carry any payload".into()));
        }
        let needed = bytes.len().div_ceil(cap).max(1);
        if needed > self.chain.len() {
            return Err(Error::Crypto(
                "container chain is too short for its sealed payload; grow it first".into(),
            ));
        }
        let mut blocks = Vec::with_capacity(self.chain.len());
        for (i, &block_index) in self.chain.iter().enumerate() {
            let start = i * cap;
            let data_len = bytes.len().saturating_sub(start).min(cap);
            let mut chunk = Vec::with_capacity(cap + 1);
            chunk.push(PAYLOAD_TAG);
            chunk.extend_from_slice(&bytes[start..start + data_len]);
            // Free space beyond the real data, including in the final
            // block, is filled with fresh randomness rather than zeros so
            // it carries no telltale run of zero bytes.
            let mut pad = vec![0u8; cap - data_len];
            crate::rng::fill_bytes(rng, &mut pad);
            chunk.extend_from_slice(&pad);

            let m = BigUint::from_bytes_be(&chunk);
            let x = hash::derive_elgamal_exponent(&self.base_key, block_index, gp);
            let block = crate::group::elgamal_encrypt(gp, &x, &m, rng);
            blocks.push((block_index, block));
        }
        self.dirty = false;
        Ok(blocks)
    }

    /// Rebuild this container's anchor's access slice (used after growing
    /// `self.chain`).
    pub fn to_access_slice(&self) -> AccessSlice {
        match self.kind {
            Capability::Full => AccessSlice::full(
                self.id,
                self.chain.clone(),
                self.list_key.expect("Full container always has list_key"),
                self.secret_key.expect("Full container always has secret_key"),
                self.append_key.expect("Full container always has append_key"),
            ),
            Capability::ListOnly => {
                AccessSlice::list_only(self.id, self.chain.clone(), self.list_key.expect("ListOnly has list_key"))
            }
            Capability::AppendOnly => AccessSlice::append_only(
                self.id,
                self.chain.clone(),
                self.append_key.expect("AppendOnly has append_key"),
            ),
        }
    }

    pub fn grow_chain(&mut self, extra_blocks: &[u64]) {
        self.chain.extend_from_slice(extra_blocks);
    }

    /// Build a brand-new, empty container at `anchor_index`. `base_key` is
    /// this capability's own stretched password (used for its chain's
    /// ElGamal exponents); the symmetric keys are whatever this capability
    /// is owed, normally copied verbatim from the container's `Full`
    /// sibling so every capability level agrees on the same key material.
    pub fn new(
        kind: Capability,
        id: [u8; 4],
        anchor_index: u64,
        base_key: Vec<u8>,
        list_key: Option<[u8; 32]>,
        secret_key: Option<[u8; 32]>,
        append_key: Option<[u8; 32]>,
    ) -> Container {
        Container {
            id,
            kind,
            anchor_index,
            chain: Vec::new(),
            base_key: Zeroizing::new(base_key),
            list_key,
            secret_key,
            append_key,
            main_data: Vec::new(),
            secret_data: Vec::new(),
            append_data: Vec::new(),
            dirty: true,
        }
    }

    /// Encrypt this container's current access slice under its own anchor
    /// exponent, ready to write into the block store at `anchor_index()`.
    pub fn seal_anchor(&self, gp: &GroupParams, block_index_size: u8, rng: &mut impl RngCore) -> Result<Block> {
        let slice = self.to_access_slice();
        let capacity = gp.plaintext_capacity();
        let bytes = slice.encode(block_index_size, capacity, rng)?;
        let m = BigUint::from_bytes_be(&bytes);
        let x = hash::derive_elgamal_exponent(&self.base_key, self.anchor_index, gp);
        Ok(crate::group::elgamal_encrypt(gp, &x, &m, rng))
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self.kind {
            Capability::Full => {
                write_segment(&mut out, &self.main_data, self.list_key.as_ref())?;
                write_segment(&mut out, &self.secret_data, self.secret_key.as_ref())?;
                write_segment(&mut out, &self.append_data, self.append_key.as_ref())?;
            }
            Capability::ListOnly => {
                write_segment(&mut out, &self.main_data, self.list_key.as_ref())?;
            }
            Capability::AppendOnly => {
                write_segment(&mut out, &self.append_data, self.append_key.as_ref())?;
            }
        }
        Ok(out)
    }

    /// Materialize a container from its access slice plus the already
    /// ElGamal-decrypted payload blocks of its chain. Full capability
    /// migrates any pending append entries immediately and invokes
    /// `on_move_append_entries` exactly once if any were found.
    pub fn open(
        slice: &AccessSlice,
        anchor_index: u64,
        base_key: Vec<u8>,
        payload_blocks: &[Block],
        gp: &GroupParams,
        mut on_move_append_entries: impl FnMut(&[Entry]),
    ) -> Result<Container> {
        let cap = gp.plaintext_capacity().saturating_sub(1);
        let bytes = unpack_blocks(payload_blocks, gp, &base_key, &slice.chain, cap)?;

        let mut pos = 0usize;
        let mut container = Container {
            id: slice.id,
            kind: slice.kind,
            anchor_index,
            chain: slice.chain.clone(),
            base_key: Zeroizing::new(base_key),
            list_key: slice.list_key,
            secret_key: slice.secret_key,
            append_key: slice.append_key,
            main_data: Vec::new(),
            secret_data: Vec::new(),
            append_data: Vec::new(),
            dirty: false,
        };

        match slice.kind {
            Capability::Full => {
                container.main_data = read_segment(&bytes, &mut pos, slice.list_key.as_ref())?;
                container.secret_data = read_segment(&bytes, &mut pos, slice.secret_key.as_ref())?;
                container.append_data = read_segment(&bytes, &mut pos, slice.append_key.as_ref())?;
                if !container.append_data.is_empty() {
                    let moved: Vec<Entry> = container
                        .append_data
                        .iter()
                        .map(|a| Entry {
                            key: a.key.clone(),
                            note: a.note.clone(),
                            secret: Some(a.secret.clone()),
                        })
                        .collect();
                    for a in container.append_data.drain(..) {
                        container.main_data.push(MainEntry { key: a.key, note: a.note });
                        container.secret_data.push(a.secret);
                    }
                    container.dirty = true;
                    on_move_append_entries(&moved);
                }
            }
            Capability::ListOnly => {
                container.main_data = read_segment(&bytes, &mut pos, slice.list_key.as_ref())?;
            }
            Capability::AppendOnly => {
                container.append_data = read_segment(&bytes, &mut pos, slice.append_key.as_ref())?;
            }
        }
        Ok(container)
    }
}

fn write_segment<T: Serialize>(out: &mut Vec<u8>, items: &[T], key: Option<&[u8; 32]>) -> Result<()> {
    let key = key.ok_or_else(|| Error::Crypto("segment requires a key this capability lacks".into()))?;
    let plain = rmp_serde::to_vec(items).map_err(|e| Error::Crypto(format!("encode segment: {e}")))?;
    let sealed = seal(key, &plain)?;
    out.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
    out.extend_from_slice(&sealed);
    Ok(())
}

fn read_segment<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
    pos: &mut usize,
    key: Option<&[u8; 32]>,
) -> Result<Vec<T>> {
    let key = key.ok_or_else(|| Error::Crypto("segment requires a key this capability lacks".into()))?;
    if bytes.len() < *pos + 4 {
        return Err(Error::SafeFormat("truncated container segment length".into()));
    }
    let len = u32::from_be_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if bytes.len() < *pos + len {
        return Err(Error::SafeFormat("truncated container segment body".into()));
    }
    let sealed = &bytes[*pos..*pos + len];
    *pos += len;
    let plain = open(key, sealed)?;
    rmp_serde::from_slice(&plain).map_err(|e| Error::SafeFormat(format!("decode segment: {e}")))
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; 24];
    crate::rng::fill_bytes(&mut crate::rng::fresh(), &mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::Crypto("payload seal failed".into()))?;
    let mut out = Vec::with_capacity(24 + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(out)
}

fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 24 {
        return Err(Error::SafeFormat("sealed payload shorter than a nonce".into()));
    }
    let (nonce_bytes, ct) = sealed.split_at(24);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ct)
        .map_err(|_| Error::Crypto("payload open failed: wrong key or tampered data".into()))
}

fn unpack_blocks(
    blocks: &[Block],
    gp: &GroupParams,
    base_key: &[u8],
    chain: &[u64],
    cap: usize,
) -> Result<Vec<u8>> {
    if blocks.len() != chain.len() {
        return Err(Error::SafeFormat("access slice chain length does not match block count".into()));
    }
    let mut out = Vec::with_capacity(blocks.len() * cap);
    for (block, &index) in blocks.iter().zip(chain.iter()) {
        let x = hash::derive_elgamal_exponent(base_key, index, gp);
        let m = crate::group::elgamal_decrypt(gp, &x, block);
        let mut bytes = m.to_bytes_be();
        let want = cap + 1;
        if bytes.len() < want {
            let mut padded = vec![0u8; want - bytes.len()];
            padded.extend_from_slice(&bytes);
            bytes = padded;
        }
        if bytes.first() != Some(&PAYLOAD_TAG) {
            return Err(Error::SafeFormat("payload block missing its tag byte".into()));
        }
        out.extend_from_slice(&bytes[1..]);
    }
    Ok(out)
}

/// Derive this container's four purpose keys from its base key, in
/// creation order: `(list_key, secret_key, append_key, display_id)`.
pub fn derive_keys(base_key: &[u8]) -> ([u8; 32], [u8; 32], [u8; 32], [u8; 4]) {
    (
        hash::derive_symmetric_key(base_key, &Tag::LIST),
        hash::derive_symmetric_key(base_key, &Tag::SECRET),
        hash::derive_symmetric_key(base_key, &Tag::APPEND),
        hash::derive_display_id(base_key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn toy_group() -> GroupParams {
        // A 1024-bit-ish safe prime is needed for any realistic capacity;
        // reuse the crate's bundled precomputed parameters for test speed.
        crate::group::precomputed_group_params_for_test()
    }

    fn make_full(base_key: Vec<u8>, chain: Vec<u64>) -> Container {
        let (list_key, secret_key, append_key, id) = derive_keys(&base_key);
        Container {
            id,
            kind: Capability::Full,
            anchor_index: 0,
            chain,
            base_key: Zeroizing::new(base_key),
            list_key: Some(list_key),
            secret_key: Some(secret_key),
            append_key: Some(append_key),
            main_data: Vec::new(),
            secret_data: Vec::new(),
            append_data: Vec::new(),
            dirty: false,
        }
    }

    #[test]
    fn add_then_seal_then_reopen_roundtrips() {
        let gp = toy_group();
        let mut rng = OsRng;
        let base_key = b"a test base key material".to_vec();
        let mut container = make_full(base_key.clone(), vec![1, 2, 3, 4]);
        container.add("site".into(), "work login".into(), "hunter2".into()).unwrap();

        let blocks = container.seal_chain(&gp, &mut rng).unwrap();
        let payload_blocks: Vec<Block> = blocks.into_iter().map(|(_, b)| b).collect();

        let slice = container.to_access_slice();
        let reopened = Container::open(&slice, 0, base_key, &payload_blocks, &gp, |_| {}).unwrap();
        let entries = reopened.get("site").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].note, "work login");
        assert_eq!(entries[0].secret.as_deref(), Some("hunter2"));
    }

    #[test]
    fn list_only_cannot_add_or_read_secrets() {
        let gp = toy_group();
        let base_key = b"list only key".to_vec();
        let (list_key, _secret_key, _append_key, id) = derive_keys(&base_key);
        let container = Container {
            id,
            kind: Capability::ListOnly,
            anchor_index: 0,
            chain: vec![1],
            base_key: Zeroizing::new(base_key),
            list_key: Some(list_key),
            secret_key: None,
            append_key: None,
            main_data: Vec::new(),
            secret_data: Vec::new(),
            append_data: Vec::new(),
            dirty: false,
        };
        assert!(container.can_list());
        assert!(!container.can_add());
        assert!(!container.can_read_secrets());
        assert!(matches!(container.get("anything"), Err(Error::MissingKey)));
        let _ = gp;
    }

    #[test]
    fn append_only_stages_entries_until_full_migrates_them() {
        let gp = toy_group();
        let mut rng = OsRng;
        let base_key = b"append migration base key".to_vec();

        // An AppendOnly-shaped container with one staged entry, sealed the
        // way `add` would produce it.
        let mut appender = make_full(base_key.clone(), vec![1, 2, 3, 4]);
        appender.append_data.push(AppendEntry {
            key: "wifi".into(),
            note: "home".into(),
            secret: "s3cr3t".into(),
        });
        let blocks = appender.seal_chain(&gp, &mut rng).unwrap();
        let payload_blocks: Vec<Block> = blocks.into_iter().map(|(_, b)| b).collect();
        let slice = appender.to_access_slice();

        let mut call_count = 0;
        let mut moved_keys = Vec::new();
        let reopened = Container::open(&slice, 0, base_key, &payload_blocks, &gp, |moved| {
            call_count += 1;
            moved_keys.extend(moved.iter().map(|e| e.key.clone()));
        })
        .unwrap();

        assert_eq!(call_count, 1, "on_move_append_entries must fire exactly once");
        assert_eq!(moved_keys, vec!["wifi".to_string()]);
        assert!(reopened.is_dirty(), "migration must mark the container dirty for the next save");
        let entries = reopened.get("wifi").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].secret.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn no_pending_append_entries_means_callback_never_fires() {
        let gp = toy_group();
        let mut rng = OsRng;
        let base_key = b"no pending append entries".to_vec();
        let mut container = make_full(base_key.clone(), vec![1, 2, 3, 4]);
        container.add("site".into(), "note".into(), "secret".into()).unwrap();
        let blocks = container.seal_chain(&gp, &mut rng).unwrap();
        let payload_blocks: Vec<Block> = blocks.into_iter().map(|(_, b)| b).collect();
        let slice = container.to_access_slice();

        let mut call_count = 0;
        let reopened = Container::open(&slice, 0, base_key, &payload_blocks, &gp, |_| {
            call_count += 1;
        })
        .unwrap();
        assert_eq!(call_count, 0);
        assert!(!reopened.is_dirty());
    }
}
