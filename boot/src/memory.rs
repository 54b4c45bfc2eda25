//! memory.rs - Address space backing stores
//!
//! Containers are addressed by physical base. A `BackingStore` turns
//! (address, len) into a byte slice or refuses; it never returns a partial
//! range. Firmware uses `PhysicalMemory`; hosts and tests use windows over
//! owned buffers.

use arrayvec::ArrayVec;

use crate::error::{ContainerError, Result};

pub const MAX_WINDOWS: usize = 8;

pub trait BackingStore {
    /// The `len` bytes at `address`, or `None` if any of them is unmapped.
    fn map(&self, address: u64, len: usize) -> Option<&[u8]>;
}

/// A buffer pretending to live at `base`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryWindow<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> MemoryWindow<'a> {
    pub const fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.bytes.len() as u64)
    }

    fn contains_range(&self, address: u64, len: usize) -> Option<core::ops::Range<usize>> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len()).then_some(start..end)
    }
}

impl BackingStore for MemoryWindow<'_> {
    fn map(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.contains_range(address, len).map(|r| &self.bytes[r])
    }
}

/// Several non-overlapping windows (e.g. a flash image plus a RAM copy).
#[derive(Debug, Clone, Default)]
pub struct MemoryMap<'a> {
    windows: ArrayVec<MemoryWindow<'a>, MAX_WINDOWS>,
}

impl<'a> MemoryMap<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&mut self, base: u64, bytes: &'a [u8]) -> Result<()> {
        let window = MemoryWindow::new(base, bytes);
        if self.windows.iter().any(|w| window.base < w.end() && w.base < window.end()) {
            return Err(ContainerError::InvalidParameter);
        }
        self.windows.try_push(window).map_err(|_| ContainerError::OutOfResources)
    }
}

impl BackingStore for MemoryMap<'_> {
    fn map(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.windows.iter().find_map(|w| w.map(address, len))
    }
}

/// Identity-mapped physical memory below `limit`.
#[derive(Debug)]
pub struct PhysicalMemory {
    limit: u64,
}

impl PhysicalMemory {
    /// # Safety
    /// Every address in `[1, limit)` must be identity-mapped, readable and
    /// not written to for as long as this value (and any slice it hands
    /// out) is alive.
    pub const unsafe fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl BackingStore for PhysicalMemory {
    fn map(&self, address: u64, len: usize) -> Option<&[u8]> {
        let end = address.checked_add(len as u64)?;
        if address == 0 || end > self.limit {
            return None;
        }
        let ptr = usize::try_from(address).ok()? as *const u8;
        // SAFETY: range is inside the identity-mapped span promised to `new`.
        Some(unsafe { core::slice::from_raw_parts(ptr, len) })
    }
}
