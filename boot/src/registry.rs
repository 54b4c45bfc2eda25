//! registry.rs - Fixed-capacity table of registered containers
//!
//! The platform allocates the table once (`with_capacity` / `allocate`);
//! until then every operation answers `NotReady`. Capacity never grows: the
//! slot vector is reserved up front and registration past it reports the
//! size that would have fit.
//!
//! Each entry keeps a private copy of the container's header region so
//! later lookups never re-read (possibly rewritten) flash.

use alloc::vec::Vec;

use log::{debug, info};

use crate::auth::Digest;
use crate::error::{ContainerError, Result};
use crate::layout::{ContainerView, Signature};

pub const DEFAULT_CAPACITY: usize = 16;

/// Container-wide authentication state. Only mono-signed containers
/// leave `Pending` after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerTrust {
    Pending,
    Verified,
    Rejected,
}

impl ContainerTrust {
    pub(crate) const fn code(self) -> u8 {
        match self {
            ContainerTrust::Pending => 0,
            ContainerTrust::Verified => 1,
            ContainerTrust::Rejected => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ContainerTrust::Pending),
            1 => Some(ContainerTrust::Verified),
            2 => Some(ContainerTrust::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerEntry {
    signature: Signature,
    base: u64,
    header: Vec<u8>,
    trust: ContainerTrust,
    digest: Option<Digest>,
}

impl ContainerEntry {
    /// `header` must already have passed `ContainerView::parse`.
    pub(crate) fn new(signature: Signature, base: u64, header: Vec<u8>, trust: ContainerTrust, digest: Option<Digest>) -> Self {
        Self { signature, base, header, trust, digest }
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Length of the cached header region (== data_offset).
    pub fn header_size(&self) -> usize {
        self.header.len()
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    pub fn view(&self) -> Result<ContainerView<'_>> {
        ContainerView::parse(&self.header)
    }

    /// Absolute address of the payload region.
    pub fn data_base(&self) -> Result<u64> {
        self.base
            .checked_add(self.header.len() as u64)
            .ok_or(ContainerError::VolumeCorrupted("container wraps address space"))
    }

    pub fn trust(&self) -> ContainerTrust {
        self.trust
    }

    /// Container-level digest once authenticated.
    pub fn digest(&self) -> Option<Digest> {
        self.digest
    }

    pub(crate) fn settle(&mut self, trust: ContainerTrust, digest: Option<Digest>) {
        self.trust = trust;
        self.digest = digest;
    }
}

#[derive(Debug, Default)]
pub struct ContainerRegistry {
    slots: Option<Vec<ContainerEntry>>,
    capacity: usize,
}

impl ContainerRegistry {
    /// A registry the platform has not allocated yet.
    pub const fn unallocated() -> Self {
        Self { slots: None, capacity: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut registry = Self::unallocated();
        registry.allocate(capacity)?;
        Ok(registry)
    }

    /// Allocate slot storage. Allowed once.
    pub fn allocate(&mut self, capacity: usize) -> Result<()> {
        if self.slots.is_some() {
            return Err(ContainerError::AlreadyStarted);
        }
        if capacity == 0 {
            return Err(ContainerError::InvalidParameter);
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| ContainerError::OutOfResources)?;
        self.slots = Some(slots);
        self.capacity = capacity;
        info!(target: "registry", "allocated {} container slots", capacity);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.slots.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered containers in registration order.
    pub fn entries(&self) -> Result<&[ContainerEntry]> {
        self.slots.as_deref().ok_or(ContainerError::NotReady)
    }

    pub fn find(&self, signature: Signature) -> Result<&ContainerEntry> {
        self.entries()?
            .iter()
            .find(|e| e.signature == signature)
            .ok_or(ContainerError::NotFound)
    }

    pub(crate) fn find_mut(&mut self, signature: Signature) -> Result<&mut ContainerEntry> {
        self.slots
            .as_mut()
            .ok_or(ContainerError::NotReady)?
            .iter_mut()
            .find(|e| e.signature == signature)
            .ok_or(ContainerError::NotFound)
    }

    /// Would a registration under `signature` be accepted?
    pub fn check_room(&self, signature: Signature) -> Result<()> {
        let slots = self.entries()?;
        if slots.iter().any(|e| e.signature == signature) {
            return Err(ContainerError::AlreadyStarted);
        }
        if slots.len() >= self.capacity {
            return Err(ContainerError::BufferTooSmall { required: self.capacity + 1 });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, entry: ContainerEntry) -> Result<()> {
        self.check_room(entry.signature)?;
        let slots = self.slots.as_mut().ok_or(ContainerError::NotReady)?;
        debug!(target: "registry", "slot {} <- {} @ {:#x}", slots.len(), entry.signature, entry.base);
        slots.push(entry);
        Ok(())
    }

    /// Remove a container; remaining entries keep their order.
    pub fn unregister_container(&mut self, signature: Signature) -> Result<()> {
        let slots = self.slots.as_mut().ok_or(ContainerError::NotReady)?;
        let index = slots
            .iter()
            .position(|e| e.signature == signature)
            .ok_or(ContainerError::NotFound)?;
        slots.remove(index);
        info!(target: "registry", "unregistered {}", signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ContainerHeader, CONTAINER_VERSION};
    use zerocopy::{AsBytes, U16, U32};

    fn entry(tag: &[u8; 4]) -> ContainerEntry {
        let header = ContainerHeader {
            signature: *tag,
            version: CONTAINER_VERSION,
            svn: 0,
            data_offset: U16::new(16),
            data_size: U32::new(0),
            auth_type: 0,
            image_type: 0,
            flags: 0,
            count: 0,
        };
        ContainerEntry::new(Signature::new(*tag), 0x1000, header.as_bytes().to_vec(), ContainerTrust::Verified, None)
    }

    #[test]
    fn unallocated_is_not_ready() {
        let mut r = ContainerRegistry::unallocated();
        assert_eq!(r.find(Signature::new(*b"BOOT")).unwrap_err(), ContainerError::NotReady);
        assert_eq!(r.insert(entry(b"BOOT")), Err(ContainerError::NotReady));
        assert_eq!(r.unregister_container(Signature::new(*b"BOOT")), Err(ContainerError::NotReady));
        r.allocate(2).unwrap();
        assert_eq!(r.allocate(2), Err(ContainerError::AlreadyStarted));
    }

    #[test]
    fn full_table_reports_required_size() {
        let mut r = ContainerRegistry::with_capacity(2).unwrap();
        r.insert(entry(b"AAAA")).unwrap();
        r.insert(entry(b"BBBB")).unwrap();
        assert_eq!(r.insert(entry(b"CCCC")), Err(ContainerError::BufferTooSmall { required: 3 }));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn duplicate_signature_rejected() {
        let mut r = ContainerRegistry::with_capacity(4).unwrap();
        r.insert(entry(b"AAAA")).unwrap();
        assert_eq!(r.insert(entry(b"AAAA")), Err(ContainerError::AlreadyStarted));
    }

    #[test]
    fn unregister_keeps_order() {
        let mut r = ContainerRegistry::with_capacity(4).unwrap();
        for tag in [b"AAAA", b"BBBB", b"CCCC"] {
            r.insert(entry(tag)).unwrap();
        }
        r.unregister_container(Signature::new(*b"BBBB")).unwrap();
        let order: alloc::vec::Vec<_> = r.entries().unwrap().iter().map(|e| e.signature()).collect();
        assert_eq!(order, [Signature::new(*b"AAAA"), Signature::new(*b"CCCC")]);
        assert_eq!(r.unregister_container(Signature::new(*b"BBBB")), Err(ContainerError::NotFound));
        // freed slot is reusable
        r.insert(entry(b"DDDD")).unwrap();
        r.insert(entry(b"EEEE")).unwrap();
        assert_eq!(r.insert(entry(b"FFFF")), Err(ContainerError::BufferTooSmall { required: 5 }));
    }

    #[test]
    fn cached_header_is_a_view() {
        let mut r = ContainerRegistry::with_capacity(1).unwrap();
        r.insert(entry(b"BOOT")).unwrap();
        let e = r.find(Signature::new(*b"BOOT")).unwrap();
        assert_eq!(e.view().unwrap().signature(), Signature::new(*b"BOOT"));
        assert_eq!(e.data_base().unwrap(), 0x1010);
    }
}
