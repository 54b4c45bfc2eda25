//! locator.rs - (container, component) -> directory entry or flash region
//!
//! Two independent resolvers:
//!   - registry: walk the cached directory of a registered container
//!   - flash map: the container signature names a flat flash region
//!
//! The flash map is consulted only when the registry answers definitively
//! that the container is not registered (or not allocated yet). A missing
//! component inside a registered container is a plain `NotFound`.

use log::debug;

use crate::error::{ContainerError, Result};
use crate::flash_map::{BootPartition, FlashMap, FlashRegion};
use crate::layout::{ComponentEntry, ContainerView, Signature};
use crate::registry::{ContainerEntry, ContainerRegistry};

/// A directory hit inside a registered container.
#[derive(Debug, Clone, Copy)]
pub struct LocatedEntry<'r> {
    pub container: &'r ContainerEntry,
    pub component: ComponentEntry<'r>,
    /// Absolute address: base + data_offset + offset.
    pub address: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum Resolution<'r> {
    Component(LocatedEntry<'r>),
    FlashRegion(FlashRegion),
}

impl Resolution<'_> {
    pub fn address(&self) -> u64 {
        match self {
            Resolution::Component(e) => e.address,
            Resolution::FlashRegion(r) => r.base,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Resolution::Component(e) => e.component.size(),
            Resolution::FlashRegion(r) => r.size,
        }
    }
}

/// Scan a registered container's directory.
pub fn locate_in_container(entry: &ContainerEntry, component: Signature) -> Result<LocatedEntry<'_>> {
    let view = entry.view()?;
    let hit = *view.find(component).ok_or(ContainerError::NotFound)?;
    let address = entry
        .data_base()?
        .checked_add(hit.offset() as u64)
        .ok_or(ContainerError::VolumeCorrupted("component wraps address space"))?;
    debug!(target: "locator", "{}/{} -> {:#x}+{:#x}", entry.signature(), component, address, hit.size());
    Ok(LocatedEntry { container: entry, component: hit, address })
}

/// Find `component` in `view`, a container that need not be registered.
pub fn locate_in_view<'a>(view: &ContainerView<'a>, component: Signature) -> Result<ComponentEntry<'a>> {
    view.find(component).copied().ok_or(ContainerError::NotFound)
}

/// Registry first, then the flash map.
pub fn resolve<'r>(
    registry: &'r ContainerRegistry,
    flash_map: Option<&dyn FlashMap>,
    partition: BootPartition,
    container: Signature,
    component: Signature,
) -> Result<Resolution<'r>> {
    let miss = match registry.find(container) {
        Ok(entry) => return locate_in_container(entry, component).map(Resolution::Component),
        Err(e @ (ContainerError::NotFound | ContainerError::NotReady)) => e,
        Err(e) => return Err(e),
    };

    match flash_map.and_then(|m| m.region(container, partition)) {
        Some(region) => {
            debug!(target: "locator", "{} not registered, using flash region {:#x}", container, region.base);
            Ok(Resolution::FlashRegion(region))
        }
        None => Err(miss),
    }
}

/// Advance a directory cursor over the distinct names of a container.
///
/// `Signature::NONE` starts at the first entry. Otherwise the cursor moves
/// from the first entry bearing its name to the next entry whose name has
/// not appeared earlier in the directory. Later duplicates are shadowed by
/// `find` and are skipped, so every call moves strictly forward and a walk
/// ends in `NotFound`.
pub fn next_component(registry: &ContainerRegistry, container: Signature, cursor: Option<&mut Signature>) -> Result<()> {
    let cursor = cursor.ok_or(ContainerError::InvalidParameter)?;
    let view = registry.find(container)?.view()?;
    let entries = view.entries();
    let start = if cursor.is_none() {
        0
    } else {
        view.find(*cursor).ok_or(ContainerError::NotFound)?.index() + 1
    };
    let next = (start..entries.len())
        .find(|&j| !entries[..j].iter().any(|e| e.name() == entries[j].name()))
        .ok_or(ContainerError::NotFound)?;
    *cursor = entries[next].name();
    Ok(())
}

/// Every directory entry of a registered container, in directory order,
/// duplicates included.
pub struct Components<'r> {
    view: ContainerView<'r>,
    index: usize,
}

impl<'r> Components<'r> {
    pub fn new(registry: &'r ContainerRegistry, container: Signature) -> Result<Self> {
        let view = registry.find(container)?.view()?;
        Ok(Self { view, index: 0 })
    }
}

impl Iterator for Components<'_> {
    type Item = Signature;

    fn next(&mut self) -> Option<Signature> {
        let name = self.view.entries().get(self.index)?.name();
        self.index += 1;
        Some(name)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.view.count().saturating_sub(self.index);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Components<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ComponentEntryHeader, ContainerHeader, CONTAINER_VERSION};
    use crate::registry::ContainerTrust;
    use alloc::vec::Vec;
    use zerocopy::{AsBytes, U16, U32};

    struct OneRegion(FlashRegion);

    impl FlashMap for OneRegion {
        fn region(&self, signature: Signature, _: BootPartition) -> Option<FlashRegion> {
            (signature == self.0.signature).then_some(self.0)
        }
    }

    fn registry_with(names: &[&[u8; 4]]) -> ContainerRegistry {
        let data_offset = 16 + 16 * names.len();
        let header = ContainerHeader {
            signature: *b"BOOT",
            version: CONTAINER_VERSION,
            svn: 0,
            data_offset: U16::new(data_offset as u16),
            data_size: U32::new(0x100 * names.len() as u32),
            auth_type: 0,
            image_type: 0,
            flags: 0,
            count: names.len() as u8,
        };
        let mut bytes = header.as_bytes().to_vec();
        for (i, name) in names.iter().enumerate() {
            let e = ComponentEntryHeader {
                name: **name,
                offset: U32::new(0x100 * i as u32),
                size: U32::new(0x100),
                attribute: 0,
                alignment: 8,
                auth_type: 0,
                hash_size: 0,
            };
            bytes.extend_from_slice(e.as_bytes());
        }
        let mut r = ContainerRegistry::with_capacity(4).unwrap();
        r.insert(ContainerEntry::new(Signature::new(*b"BOOT"), 0x8000_0000, bytes, ContainerTrust::Verified, None))
            .unwrap();
        r
    }

    #[test]
    fn address_is_base_plus_data_offset_plus_offset() {
        let r = registry_with(&[b"SG1A", b"SG1B"]);
        let hit = locate_in_container(r.find(Signature::new(*b"BOOT")).unwrap(), Signature::new(*b"SG1B")).unwrap();
        assert_eq!(hit.address, 0x8000_0000 + 48 + 0x100);
    }

    #[test]
    fn missing_component_does_not_fall_back() {
        let r = registry_with(&[b"SG1A"]);
        let map = OneRegion(FlashRegion {
            signature: Signature::new(*b"BOOT"),
            base: 0xFFF0_0000,
            size: 0x1000,
            flags: crate::flash_map::FlashRegionFlags::empty(),
        });
        let res = resolve(&r, Some(&map), BootPartition::Primary, Signature::new(*b"BOOT"), Signature::new(*b"NOPE"));
        assert_eq!(res.err(), Some(ContainerError::NotFound));
    }

    #[test]
    fn unregistered_container_uses_flash_map() {
        let r = registry_with(&[b"SG1A"]);
        let region = FlashRegion {
            signature: Signature::new(*b"SG02"),
            base: 0xFFF0_0000,
            size: 0x1000,
            flags: crate::flash_map::FlashRegionFlags::empty(),
        };
        let map = OneRegion(region);
        match resolve(&r, Some(&map), BootPartition::Primary, Signature::new(*b"SG02"), Signature::NONE).unwrap() {
            Resolution::FlashRegion(found) => assert_eq!(found, region),
            Resolution::Component(_) => panic!("expected flash region"),
        }
        assert_eq!(
            resolve(&r, None, BootPartition::Primary, Signature::new(*b"SG02"), Signature::NONE).err(),
            Some(ContainerError::NotFound)
        );
        // not allocated yet: the flash map still answers, otherwise NotReady
        let empty = ContainerRegistry::unallocated();
        assert!(resolve(&empty, Some(&map), BootPartition::Primary, Signature::new(*b"SG02"), Signature::NONE).is_ok());
        assert_eq!(
            resolve(&empty, None, BootPartition::Primary, Signature::new(*b"SG02"), Signature::NONE).err(),
            Some(ContainerError::NotReady)
        );
    }

    #[test]
    fn cursor_walks_directory_order() {
        let r = registry_with(&[b"AAAA", b"BBBB", b"CCCC"]);
        let boot = Signature::new(*b"BOOT");
        let mut cursor = Signature::NONE;
        let mut seen = Vec::new();
        while next_component(&r, boot, Some(&mut cursor)).is_ok() {
            seen.push(cursor);
        }
        assert_eq!(seen, [Signature::new(*b"AAAA"), Signature::new(*b"BBBB"), Signature::new(*b"CCCC")]);
        assert_eq!(next_component(&r, boot, None), Err(ContainerError::InvalidParameter));
        assert_eq!(Components::new(&r, boot).unwrap().count(), 3);
    }

    #[test]
    fn adjacent_duplicates_do_not_stall_the_cursor() {
        let r = registry_with(&[b"DUPE", b"DUPE", b"XXXX"]);
        let boot = Signature::new(*b"BOOT");
        let mut cursor = Signature::NONE;
        let mut seen = Vec::new();
        for _ in 0..8 {
            match next_component(&r, boot, Some(&mut cursor)) {
                Ok(()) => seen.push(cursor),
                Err(e) => {
                    assert_eq!(e, ContainerError::NotFound);
                    break;
                }
            }
        }
        assert_eq!(seen, [Signature::new(*b"DUPE"), Signature::new(*b"XXXX")]);

        let all: Vec<_> = Components::new(&r, boot).unwrap().collect();
        assert_eq!(all, [Signature::new(*b"DUPE"), Signature::new(*b"DUPE"), Signature::new(*b"XXXX")]);
    }

    #[test]
    fn separated_duplicates_are_visited_once_by_the_cursor() {
        let r = registry_with(&[b"DUPE", b"XXXX", b"DUPE", b"YYYY"]);
        let boot = Signature::new(*b"BOOT");
        let mut cursor = Signature::NONE;
        let mut seen = Vec::new();
        for _ in 0..8 {
            if next_component(&r, boot, Some(&mut cursor)).is_err() {
                break;
            }
            seen.push(cursor);
        }
        assert_eq!(seen, [Signature::new(*b"DUPE"), Signature::new(*b"XXXX"), Signature::new(*b"YYYY")]);

        let components = Components::new(&r, boot).unwrap();
        assert_eq!(components.len(), 4);
        assert_eq!(components.last(), Some(Signature::new(*b"YYYY")));
    }
}
