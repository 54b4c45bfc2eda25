//! container-boot - boot-time container registry, locator and authenticated loader
//!
//! A container is a signed bundle of named components laid out in flash or
//! memory. This crate registers containers by signature, finds components by
//! (container, component) name, copies them out, authenticates the copy and
//! decompresses it when flagged.
//!
//! Layering (bottom-up):
//!   layout      on-media structs + bounds-checked views
//!   auth        digests, signature blobs, RSA verification
//!   keys        trusted public-key digests by usage
//!   memory      address -> byte-slice backing stores
//!   registry    fixed-capacity table of registered containers
//!   flash_map   FLMP region table for unregistered lookups
//!   locator     (container, component) -> directory entry / flash region
//!   decompress  LZDM/ZLIB adapter with a pluggable codec
//!   progress    per-phase load observer
//!   loader      the public facade tying it all together
//!   handoff     registry serialisation across boot stages
//!   builder     container producer for tooling and tests

#![no_std]
#![forbid(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod auth;
pub mod builder;
pub mod decompress;
pub mod error;
pub mod flash_map;
pub mod handoff;
pub mod keys;
pub mod layout;
pub mod loader;
pub mod locator;
pub mod memory;
pub mod progress;
pub mod registry;

pub use auth::{AuthType, Digest, HashAlg};
pub use error::{ContainerError, Result};
pub use flash_map::{BootPartition, FlashMap, FlashMapTable, FlashRegion};
pub use keys::{KeyHashStore, KeyStore, KeyUsage};
pub use layout::{ImageType, Signature};
pub use loader::{LoadedComponent, LocatedImage, Loader};
pub use memory::{BackingStore, MemoryMap, MemoryWindow};
pub use progress::{LoadObserver, LoadPhase, LoadSnapshot};
pub use registry::ContainerRegistry;
