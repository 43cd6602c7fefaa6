//! Password stretching via Argon2id. Parameters are generated once at safe
//! creation and persisted in the safe's `key-stretching` field so that
//! `stretch` is deterministic for any future load.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persistable Argon2id cost parameters plus the salt they were run with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStretching {
    pub m_cost: u32,
    pub t_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

impl KeyStretching {
    /// Recommended-default cost with a fresh 16-byte salt.
    pub fn generate(rng: &mut impl RngCore) -> Self {
        let mut salt = vec![0u8; 16];
        crate::rng::fill_bytes(rng, &mut salt);
        KeyStretching {
            m_cost: 19_456,
            t_cost: 2,
            parallelism: 1,
            salt,
        }
    }

    /// Stretch `password` into a 32-byte base key under these parameters.
    pub fn stretch(&self, password: &str) -> Result<[u8; 32]> {
        if self.salt.len() < 8 {
            return Err(Error::Crypto("key-stretching salt too short".into()));
        }
        let params = Params::new(self.m_cost, self.t_cost, self.parallelism, Some(32))
            .map_err(|e| Error::Crypto(format!("invalid argon2 parameters: {e}")))?;
        let a2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut out = [0u8; 32];
        a2.hash_password_into(password.as_bytes(), &self.salt, &mut out)
            .map_err(|e| Error::Crypto(format!("argon2 stretch failed: {e}")))?;
        Ok(out)
    }
}
