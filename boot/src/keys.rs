//! keys.rs - Trusted public-key digests
//!
//! Containers carry their public key inline; trust comes from matching the
//! digest of that key against a platform-provisioned store. Each stored
//! digest is tagged with the usages it may authorise.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use log::debug;

use crate::auth::{Digest, HashAlg};
use crate::error::{ContainerError, Result};

pub const MAX_KEY_HASHES: usize = 16;

bitflags! {
    /// What a key is allowed to sign.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyUsage: u32 {
        const MASTER            = 1 << 0;
        const CONFIG_DATA       = 1 << 1;
        const FIRMWARE_UPDATE   = 1 << 2;
        const OS                = 1 << 3;
        const CONTAINER_DEFAULT = 1 << 8;
        const OEM               = 1 << 16;
    }
}

/// Source of trust for signed containers.
pub trait KeyStore {
    /// True if a key with this digest may sign for any of `usage`.
    fn is_trusted(&self, usage: KeyUsage, key_digest: &Digest) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct KeyHashEntry {
    usage: KeyUsage,
    digest: Digest,
}

/// Fixed-capacity table of (usage, key digest) pairs.
#[derive(Debug, Clone, Default)]
pub struct KeyHashStore {
    entries: ArrayVec<KeyHashEntry, MAX_KEY_HASHES>,
}

impl KeyHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, usage: KeyUsage, alg: HashAlg, digest: &[u8]) -> Result<()> {
        let digest = Digest::from_slice(alg, digest).ok_or(ContainerError::InvalidParameter)?;
        self.add_digest(usage, digest)
    }

    pub fn add_digest(&mut self, usage: KeyUsage, digest: Digest) -> Result<()> {
        if usage.is_empty() {
            return Err(ContainerError::InvalidParameter);
        }
        self.entries
            .try_push(KeyHashEntry { usage, digest })
            .map_err(|_| ContainerError::OutOfResources)?;
        debug!(target: "auth", "key hash added for {:?}", usage);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyStore for KeyHashStore {
    fn is_trusted(&self, usage: KeyUsage, key_digest: &Digest) -> bool {
        self.entries.iter().any(|e| {
            e.usage.intersects(usage) && e.digest.alg() == key_digest.alg() && e.digest.matches(key_digest.as_bytes())
        })
    }
}
