//! handoff.rs - Registry hand-off record between boot stages
//!
//! The stage that registered containers serialises its registry into one
//! flat record placed where the next stage can find it; the next stage
//! rebuilds an identical registry without re-reading flash or re-running
//! header authentication.
//!
//! Layout (little-endian, packed):
//!   HandoffHeader                                  16
//!     magic "CTRH" | version u8 | reserved u8 | count u16 |
//!     capacity u32 | total_length u32
//!   per entry:
//!     HandoffEntry                                 24
//!       signature[4] | trust u8 | has_digest u8 | digest_alg u8 |
//!       reserved u8 | base u64 | header_size u32 | reserved u32
//!     digest[48]  (zero-filled when absent)
//!     header cache[header_size]
//!
//! The consumer re-parses every cached header and checks it still names
//! the entry it is filed under; a mismatched record is rejected whole.

use alloc::vec::Vec;
use core::mem::size_of;

use log::{info, warn};
use zerocopy::{AsBytes, FromBytes, Unaligned, LE, U16, U32, U64};

use crate::auth::{Digest, HashAlg, MAX_DIGEST_LEN};
use crate::error::{ContainerError, Result};
use crate::layout::{ContainerView, Signature};
use crate::registry::{ContainerEntry, ContainerRegistry, ContainerTrust};

pub const HANDOFF_MAGIC: [u8; 4] = *b"CTRH";
pub const HANDOFF_VERSION: u8 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct HandoffHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub reserved: u8,
    pub count: U16<LE>,
    pub capacity: U32<LE>,
    pub total_length: U32<LE>, // header + all entries
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct HandoffEntry {
    pub signature: [u8; 4],
    pub trust: u8,
    pub has_digest: u8,
    pub digest_alg: u8, // HashAlg code
    pub reserved: u8,
    pub base: U64<LE>,
    pub header_size: U32<LE>,
    pub reserved2: U32<LE>,
}

const HEADER_SIZE: usize = size_of::<HandoffHeader>();
const ENTRY_SIZE: usize = size_of::<HandoffEntry>();

impl ContainerRegistry {
    /// Serialise every entry, its header cache and cached verdict.
    pub fn to_handoff(&self) -> Result<Vec<u8>> {
        let entries = self.entries()?;
        let count = u16::try_from(entries.len()).map_err(|_| ContainerError::OutOfResources)?;
        let capacity = u32::try_from(self.capacity()).map_err(|_| ContainerError::OutOfResources)?;

        let mut body = Vec::new();
        for entry in entries {
            let digest = entry.digest();
            let mut digest_bytes = [0u8; MAX_DIGEST_LEN];
            if let Some(d) = &digest {
                digest_bytes[..d.as_bytes().len()].copy_from_slice(d.as_bytes());
            }
            let record = HandoffEntry {
                signature: entry.signature().0,
                trust: entry.trust().code(),
                has_digest: digest.is_some() as u8,
                digest_alg: digest.map_or(0, |d| d.alg().code()),
                reserved: 0,
                base: U64::new(entry.base()),
                header_size: U32::new(entry.header_size() as u32),
                reserved2: U32::new(0),
            };
            body.extend_from_slice(record.as_bytes());
            body.extend_from_slice(&digest_bytes);
            body.extend_from_slice(entry.header_bytes());
        }

        let total = u32::try_from(HEADER_SIZE + body.len()).map_err(|_| ContainerError::OutOfResources)?;
        let header = HandoffHeader {
            magic: HANDOFF_MAGIC,
            version: HANDOFF_VERSION,
            reserved: 0,
            count: U16::new(count),
            capacity: U32::new(capacity),
            total_length: U32::new(total),
        };
        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&body);
        info!(target: "handoff", "registry hand-off: {} entries, {} bytes", count, total);
        Ok(out)
    }

    /// Rebuild a registry from `to_handoff` output.
    pub fn from_handoff(record: &[u8]) -> Result<ContainerRegistry> {
        let header = HandoffHeader::read_from_prefix(record)
            .ok_or(ContainerError::VolumeCorrupted("hand-off header truncated"))?;
        if header.magic != HANDOFF_MAGIC {
            return Err(ContainerError::VolumeCorrupted("hand-off magic"));
        }
        if header.version != HANDOFF_VERSION {
            return Err(ContainerError::Unsupported("hand-off version"));
        }
        let total = header.total_length.get() as usize;
        if total < HEADER_SIZE || total > record.len() {
            return Err(ContainerError::VolumeCorrupted("hand-off length"));
        }
        let count = header.count.get() as usize;
        let capacity = header.capacity.get() as usize;
        if count > capacity {
            return Err(ContainerError::VolumeCorrupted("hand-off count exceeds capacity"));
        }

        let mut registry = ContainerRegistry::with_capacity(capacity)?;
        let mut rest = &record[HEADER_SIZE..total];
        for _ in 0..count {
            let entry = HandoffEntry::read_from_prefix(rest)
                .ok_or(ContainerError::VolumeCorrupted("hand-off entry truncated"))?;
            rest = &rest[ENTRY_SIZE..];
            let (digest_bytes, tail) = split(rest, MAX_DIGEST_LEN)?;
            let (cache, tail) = split(tail, entry.header_size.get() as usize)?;
            rest = tail;

            let signature = Signature(entry.signature);
            let view = ContainerView::parse(cache)?;
            if view.signature() != signature || view.region().len() != cache.len() {
                warn!(target: "handoff", "hand-off entry {} does not match its header", signature);
                return Err(ContainerError::VolumeCorrupted("hand-off entry mismatch"));
            }
            let trust = ContainerTrust::from_code(entry.trust)
                .ok_or(ContainerError::VolumeCorrupted("hand-off trust state"))?;
            let digest = match entry.has_digest {
                0 => None,
                _ => {
                    let alg = HashAlg::from_code(entry.digest_alg)
                        .ok_or(ContainerError::VolumeCorrupted("hand-off digest algorithm"))?;
                    Digest::from_slice(alg, &digest_bytes[..alg.digest_len()])
                }
            };

            let mut header_copy = Vec::new();
            header_copy.try_reserve_exact(cache.len()).map_err(|_| ContainerError::OutOfResources)?;
            header_copy.extend_from_slice(cache);
            registry.insert(ContainerEntry::new(signature, entry.base.get(), header_copy, trust, digest))?;
        }
        if !rest.is_empty() {
            return Err(ContainerError::VolumeCorrupted("hand-off trailing bytes"));
        }
        info!(target: "handoff", "registry restored: {} entries", count);
        Ok(registry)
    }
}

fn split(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8])> {
    if at > bytes.len() {
        return Err(ContainerError::VolumeCorrupted("hand-off entry truncated"));
    }
    Ok(bytes.split_at(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ContainerHeader, CONTAINER_VERSION};

    fn header(tag: &[u8; 4]) -> Vec<u8> {
        ContainerHeader {
            signature: *tag,
            version: CONTAINER_VERSION,
            svn: 2,
            data_offset: U16::new(16),
            data_size: U32::new(0x40),
            auth_type: 0,
            image_type: 0,
            flags: 0,
            count: 0,
        }
        .as_bytes()
        .to_vec()
    }

    fn sample() -> ContainerRegistry {
        let mut r = ContainerRegistry::with_capacity(3).unwrap();
        let d = HashAlg::Sha384.digest(&[b"container"]);
        r.insert(ContainerEntry::new(Signature::new(*b"AAAA"), 0x1000, header(b"AAAA"), ContainerTrust::Verified, Some(d)))
            .unwrap();
        r.insert(ContainerEntry::new(Signature::new(*b"BBBB"), 0x2000, header(b"BBBB"), ContainerTrust::Pending, None))
            .unwrap();
        r
    }

    #[test]
    fn restores_entries_and_verdicts() {
        let record = sample().to_handoff().unwrap();
        let restored = ContainerRegistry::from_handoff(&record).unwrap();
        assert_eq!(restored.capacity(), 3);
        let a = restored.find(Signature::new(*b"AAAA")).unwrap();
        assert_eq!(a.base(), 0x1000);
        assert_eq!(a.trust(), ContainerTrust::Verified);
        assert_eq!(a.digest(), Some(HashAlg::Sha384.digest(&[b"container"])));
        let b = restored.find(Signature::new(*b"BBBB")).unwrap();
        assert_eq!(b.trust(), ContainerTrust::Pending);
        assert_eq!(b.header_bytes(), &header(b"BBBB")[..]);
    }

    #[test]
    fn rejects_corrupt_records() {
        let record = sample().to_handoff().unwrap();

        let mut bad = record.clone();
        bad[0] = b'X';
        assert!(ContainerRegistry::from_handoff(&bad).is_err());

        // entry filed under a different signature than its header says
        let mut bad = record.clone();
        bad[HEADER_SIZE] = b'Z';
        assert_eq!(
            ContainerRegistry::from_handoff(&bad).unwrap_err(),
            ContainerError::VolumeCorrupted("hand-off entry mismatch")
        );

        assert!(ContainerRegistry::from_handoff(&record[..record.len() - 1]).is_err());
        assert_eq!(ContainerRegistry::unallocated().to_handoff(), Err(ContainerError::NotReady));
    }
}
