//! flash_map.rs - FLMP flash layout table (fallback resolver)
//!
//! When a component is asked for under a container signature nobody has
//! registered, the signature is looked up here instead. The table maps
//! region tags to (offset, size) in the boot flash, which is decoded at
//! the top of the 4 GiB space.
//!
//! Layout (little-endian):
//!   FlashMapHeader  "FLMP" | version u8 | rsvd u8 | length u16 |
//!                   attributes u8 | rsvd[3] | rom_size u32          16
//!   FlashMapEntry[] tag[4] | flags u16 | rsvd u16 | offset u32 |
//!                   size u32                                        16 each
//!
//! `length` covers the header and all entries.

use core::mem::size_of;

use bitflags::bitflags;
use log::debug;
use zerocopy::{AsBytes, FromBytes, Unaligned, LE, U16, U32};

use crate::error::{ContainerError, Result};
use crate::layout::Signature;

pub const FLASH_MAP_SIGNATURE: [u8; 4] = *b"FLMP";
pub const FLASH_MAP_VERSION: u8 = 1;
pub const FLASH_MAP_HEADER_SIZE: usize = size_of::<FlashMapHeader>();
pub const FLASH_MAP_ENTRY_SIZE: usize = size_of::<FlashMapEntry>();

const FOUR_GIB: u64 = 1 << 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlashRegionFlags: u16 {
        const TOP_SWAP      = 1 << 0;
        const REDUNDANT     = 1 << 1;
        const NON_REDUNDANT = 1 << 2;
        const NON_VOLATILE  = 1 << 3;
        const COMPRESSED    = 1 << 4;
        /// Second copy of a redundant region.
        const BACKUP        = 1 << 6;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct FlashMapHeader {
    pub signature: [u8; 4],
    pub version: u8,
    pub reserved: u8,
    pub length: U16<LE>,
    pub attributes: u8,
    pub reserved2: [u8; 3],
    pub rom_size: U32<LE>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct FlashMapEntry {
    pub signature: [u8; 4],
    pub flags: U16<LE>,
    pub reserved: U16<LE>,
    pub offset: U32<LE>,
    pub size: U32<LE>,
}

/// Which copy of redundant regions the platform booted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootPartition {
    #[default]
    Primary,
    Backup,
}

/// A resolved flash region, absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub signature: Signature,
    pub base: u64,
    pub size: u32,
    pub flags: FlashRegionFlags,
}

/// Region lookup by tag. Independent of the container registry.
pub trait FlashMap {
    fn region(&self, signature: Signature, partition: BootPartition) -> Option<FlashRegion>;
}

/// Parsed view over an FLMP table.
#[derive(Debug, Clone, Copy)]
pub struct FlashMapTable<'a> {
    header: FlashMapHeader,
    entries: &'a [u8],
}

impl<'a> FlashMapTable<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = FlashMapHeader::read_from_prefix(bytes)
            .ok_or(ContainerError::VolumeCorrupted("flash map header truncated"))?;
        if header.signature != FLASH_MAP_SIGNATURE {
            return Err(ContainerError::VolumeCorrupted("flash map signature"));
        }
        if header.version != FLASH_MAP_VERSION {
            return Err(ContainerError::Unsupported("flash map version"));
        }
        let length = header.length.get() as usize;
        if length < FLASH_MAP_HEADER_SIZE
            || length > bytes.len()
            || (length - FLASH_MAP_HEADER_SIZE) % FLASH_MAP_ENTRY_SIZE != 0
        {
            return Err(ContainerError::VolumeCorrupted("flash map length"));
        }
        let rom_size = header.rom_size.get() as u64;
        if rom_size == 0 {
            return Err(ContainerError::VolumeCorrupted("flash map rom size"));
        }

        let table = Self { header, entries: &bytes[FLASH_MAP_HEADER_SIZE..length] };
        if table.iter().any(|e| e.offset.get() as u64 + e.size.get() as u64 > rom_size) {
            return Err(ContainerError::VolumeCorrupted("flash region outside rom"));
        }
        Ok(table)
    }

    pub fn rom_size(&self) -> u32 {
        self.header.rom_size.get()
    }

    /// Flash base address: the ROM ends at 4 GiB.
    pub fn rom_base(&self) -> u64 {
        FOUR_GIB - self.header.rom_size.get() as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len() / FLASH_MAP_ENTRY_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = FlashMapEntry> + 'a {
        let entries: &'a [u8] = self.entries;
        entries
            .chunks_exact(FLASH_MAP_ENTRY_SIZE)
            .filter_map(FlashMapEntry::read_from)
    }

    fn resolve(&self, entry: &FlashMapEntry) -> FlashRegion {
        FlashRegion {
            signature: Signature(entry.signature),
            base: self.rom_base() + entry.offset.get() as u64,
            size: entry.size.get(),
            flags: FlashRegionFlags::from_bits_retain(entry.flags.get()),
        }
    }
}

impl FlashMap for FlashMapTable<'_> {
    fn region(&self, signature: Signature, partition: BootPartition) -> Option<FlashRegion> {
        let want_backup = partition == BootPartition::Backup;
        let found = self
            .iter()
            .filter(|e| Signature(e.signature) == signature)
            .map(|e| self.resolve(&e))
            .find(|r| {
                // only redundant regions have a per-partition copy
                !r.flags.contains(FlashRegionFlags::REDUNDANT)
                    || r.flags.contains(FlashRegionFlags::BACKUP) == want_backup
            });
        if let Some(r) = &found {
            debug!(target: "flashmap", "{} -> {:#x}+{:#x} ({:?})", signature, r.base, r.size, partition);
        }
        found
    }
}
