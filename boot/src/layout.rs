//! layout.rs - Container binary layout (on-media structs + bounds-checked views)
//!
//! Layout (little-endian, byte-packed, no alignment assumed):
//!   +---------------------------+ 0
//!   | ContainerHeader           | 16
//!   | ComponentEntry[count]     | 16 + hash_size each, back to back
//!   | container auth data       | sized by the container auth type
//!   | padding                   |
//!   +---------------------------+ data_offset
//!   | component payloads        | data_size bytes
//!   +---------------------------+
//!
//! Everything in [0, data_offset) is the "header region". It is what the
//! registry copies at registration time and what non-mono containers sign.
//!
//! Nothing here trusts a length field: every offset is checked against the
//! slice it indexes before it is used, and every violation is reported as
//! `VolumeCorrupted` before any hashing happens.

use core::fmt;
use core::mem::size_of;

use arrayvec::ArrayVec;
use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, Unaligned, LE, U16, U32};

use crate::auth::AuthType;
use crate::error::{ContainerError, Result};

pub const CONTAINER_VERSION: u8 = 1;
pub const CONTAINER_HEADER_SIZE: usize = size_of::<ContainerHeader>();
pub const COMPONENT_ENTRY_SIZE: usize = size_of::<ComponentEntryHeader>();
pub const COMPRESSED_HEADER_SIZE: usize = size_of::<LoaderCompressedHeader>();

/// Directory capacity. `count` is a u8 on media but nothing larger is valid.
pub const MAX_COMPONENTS: usize = 32;

/// Four-byte tag naming a container or a component.
///
/// Stored as raw bytes; `as_u32` gives the little-endian integer form used
/// by firmware tables (`b"SG1A"` == `0x4131_4753`). All-zero means "none".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    pub const NONE: Signature = Signature([0; 4]);

    pub const fn new(tag: [u8; 4]) -> Self {
        Self(tag)
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn is_none(self) -> bool {
        self.0 == [0; 4]
    }

    /// Printable tag, no NULs. Erased flash (0xFF) and zeroed RAM fail this.
    pub fn is_plausible(self) -> bool {
        self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for Signature {
    fn from(tag: [u8; 4]) -> Self {
        Self(tag)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plausible() {
            for b in self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.as_u32())
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(\"{}\")", self)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u8 {
        /// One signature over header+directory+data; per-component auth ignored.
        const MONO_SIGNING = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ComponentAttributes: u8 {
        /// Payload starts with a `LoaderCompressedHeader`.
        const COMPRESSED = 1 << 0;
        /// Must be clear on media.
        const RESERVED   = 1 << 7;
    }
}

/// What the container's payload is meant to boot as.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Normal = 0,
    ClassicLinux = 3,
    Multiboot = 4,
}

impl TryFrom<u8> for ImageType {
    type Error = ContainerError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ImageType::Normal),
            3 => Ok(ImageType::ClassicLinux),
            4 => Ok(ImageType::Multiboot),
            _ => Err(ContainerError::Unsupported("image type")),
        }
    }
}

/// On-media container header. 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct ContainerHeader {
    pub signature: [u8; 4],
    pub version: u8,
    pub svn: u8,
    pub data_offset: U16<LE>, // start of payload region == header region length
    pub data_size: U32<LE>,   // payload region length
    pub auth_type: u8,        // container-level AuthType code
    pub image_type: u8,
    pub flags: u8,            // ContainerFlags
    pub count: u8,            // directory entries that follow
}

impl ContainerHeader {
    /// Read just the fixed header; nothing beyond the first 16 bytes is touched.
    pub fn peek(bytes: &[u8]) -> Result<Self> {
        ContainerHeader::read_from_prefix(bytes)
            .ok_or(ContainerError::VolumeCorrupted("container header truncated"))
    }

    pub fn signature(&self) -> Signature {
        Signature(self.signature)
    }

    /// Header region + payload region.
    pub fn total_len(&self) -> usize {
        self.data_offset.get() as usize + self.data_size.get() as usize
    }
}

/// Fixed part of a directory entry. `hash_size` bytes of hash data follow.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct ComponentEntryHeader {
    pub name: [u8; 4],
    pub offset: U32<LE>, // relative to data_offset
    pub size: U32<LE>,   // includes a trailing signature blob for signed types
    pub attribute: u8,   // ComponentAttributes
    pub alignment: u8,   // log2 of required offset alignment
    pub auth_type: u8,   // component AuthType code
    pub hash_size: u8,
}

/// Prefix of every compressed component payload. 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct LoaderCompressedHeader {
    pub signature: [u8; 4], // codec tag: "LZDM", "ZLIB", "LZ4 ", "LZMA"
    pub compressed_size: U32<LE>,
    pub size: U32<LE>,      // decompressed length
    pub version: U16<LE>,
    pub svn: u8,
    pub attribute: u8,
}

/// Header of the signature half of an RSA auth blob.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct SignatureHeader {
    pub identifier: [u8; 4], // "SIGN"
    pub sig_size: U16<LE>,
    pub sig_type: u8,        // 1 = PKCS#1 v1.5, 2 = PSS
    pub hash_alg: u8,        // 1 = SHA-256, 2 = SHA-384
}

/// Header of the public-key half of an RSA auth blob.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, AsBytes, Unaligned)]
pub struct PublicKeyHeader {
    pub identifier: [u8; 4], // "PUBK"
    pub key_size: U16<LE>,   // modulus + 4-byte exponent
    pub key_type: u8,        // 0 = RSA
    pub reserved: u8,
}

pub const SIGNATURE_IDENTIFIER: [u8; 4] = *b"SIGN";
pub const PUBLIC_KEY_IDENTIFIER: [u8; 4] = *b"PUBK";
pub const SIG_TYPE_PKCS1: u8 = 1;
pub const SIG_TYPE_PSS: u8 = 2;
pub const KEY_TYPE_RSA: u8 = 0;
pub const RSA_EXPONENT_SIZE: usize = 4;

/// One parsed directory entry, borrowing its hash data from the header region.
#[derive(Clone, Copy, Debug)]
pub struct ComponentEntry<'a> {
    raw: ComponentEntryHeader,
    hash_data: &'a [u8],
    index: usize,
}

impl<'a> ComponentEntry<'a> {
    pub fn name(&self) -> Signature {
        Signature(self.raw.name)
    }

    pub fn offset(&self) -> u32 {
        self.raw.offset.get()
    }

    pub fn size(&self) -> u32 {
        self.raw.size.get()
    }

    pub fn attributes(&self) -> ComponentAttributes {
        ComponentAttributes::from_bits_retain(self.raw.attribute)
    }

    pub fn is_compressed(&self) -> bool {
        self.attributes().contains(ComponentAttributes::COMPRESSED)
    }

    /// log2 alignment as stored.
    pub fn alignment(&self) -> u8 {
        self.raw.alignment
    }

    /// Raw auth code; decoded lazily because mono containers ignore it.
    pub fn auth_code(&self) -> u8 {
        self.raw.auth_type
    }

    pub fn auth_type(&self) -> Result<AuthType> {
        AuthType::try_from(self.raw.auth_type)
    }

    pub fn hash_data(&self) -> &'a [u8] {
        self.hash_data
    }

    /// Position in directory order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn raw(&self) -> &ComponentEntryHeader {
        &self.raw
    }
}

/// Validated view over a container header region.
#[derive(Clone, Debug)]
pub struct ContainerView<'a> {
    header: ContainerHeader,
    region: &'a [u8],
    auth_type: AuthType,
    image_type: ImageType,
    flags: ContainerFlags,
    entries: ArrayVec<ComponentEntry<'a>, MAX_COMPONENTS>,
    directory_end: usize,
}

impl<'a> ContainerView<'a> {
    /// Parse and validate a header region. `bytes` may be longer than
    /// `data_offset`; only the header region is retained.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = ContainerHeader::peek(bytes)?;

        if !header.signature().is_plausible() {
            return Err(ContainerError::VolumeCorrupted("implausible container signature"));
        }
        if header.version != CONTAINER_VERSION {
            return Err(ContainerError::Unsupported("container version"));
        }
        let count = header.count as usize;
        if count > MAX_COMPONENTS {
            return Err(ContainerError::VolumeCorrupted("directory exceeds component limit"));
        }
        let flags = ContainerFlags::from_bits(header.flags)
            .ok_or(ContainerError::VolumeCorrupted("reserved container flags set"))?;
        let auth_type = AuthType::try_from(header.auth_type)?;
        let image_type = ImageType::try_from(header.image_type)?;

        let data_offset = header.data_offset.get() as usize;
        if data_offset < CONTAINER_HEADER_SIZE || data_offset > bytes.len() {
            return Err(ContainerError::VolumeCorrupted("data offset outside header region"));
        }
        let region = &bytes[..data_offset];
        let data_size = header.data_size.get() as u64;

        let mut entries = ArrayVec::new();
        let mut pos = CONTAINER_HEADER_SIZE;
        for index in 0..count {
            let fixed_end = pos + COMPONENT_ENTRY_SIZE;
            if fixed_end > data_offset {
                return Err(ContainerError::VolumeCorrupted("directory overruns header region"));
            }
            let raw = ComponentEntryHeader::read_from_prefix(&region[pos..])
                .ok_or(ContainerError::VolumeCorrupted("directory entry truncated"))?;
            let hash_end = fixed_end + raw.hash_size as usize;
            if hash_end > data_offset {
                return Err(ContainerError::VolumeCorrupted("hash data overruns header region"));
            }

            let attributes = ComponentAttributes::from_bits_retain(raw.attribute);
            if attributes.contains(ComponentAttributes::RESERVED) {
                return Err(ContainerError::VolumeCorrupted("reserved component attribute set"));
            }
            if raw.alignment >= 32 {
                return Err(ContainerError::VolumeCorrupted("component alignment out of range"));
            }
            let offset = raw.offset.get();
            if offset & ((1u32 << raw.alignment) - 1) != 0 {
                return Err(ContainerError::VolumeCorrupted("component offset misaligned"));
            }
            let end = offset as u64 + raw.size.get() as u64;
            if end > data_size {
                return Err(ContainerError::VolumeCorrupted("component outside data region"));
            }

            entries.push(ComponentEntry { raw, hash_data: &region[fixed_end..hash_end], index });
            pos = hash_end;
        }

        let auth_end = pos + auth_type.container_auth_len();
        if auth_end > data_offset {
            return Err(ContainerError::VolumeCorrupted("container auth data overruns header region"));
        }

        Ok(Self { header, region, auth_type, image_type, flags, entries, directory_end: pos })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn signature(&self) -> Signature {
        self.header.signature()
    }

    pub fn svn(&self) -> u8 {
        self.header.svn
    }

    pub fn data_offset(&self) -> u32 {
        self.header.data_offset.get() as u32
    }

    pub fn data_size(&self) -> u32 {
        self.header.data_size.get()
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn flags(&self) -> ContainerFlags {
        self.flags
    }

    pub fn is_mono_signed(&self) -> bool {
        self.flags.contains(ContainerFlags::MONO_SIGNING)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ComponentEntry<'a>] {
        &self.entries
    }

    /// First entry in directory order with this name.
    pub fn find(&self, name: Signature) -> Option<&ComponentEntry<'a>> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// The whole header region, [0, data_offset).
    pub fn region(&self) -> &'a [u8] {
        self.region
    }

    /// Header + directory: the bytes container-level auth covers.
    pub fn directory_bytes(&self) -> &'a [u8] {
        &self.region[..self.directory_end]
    }

    /// Container-level auth data (digest or signature blob).
    pub fn auth_data(&self) -> &'a [u8] {
        let end = self.directory_end + self.auth_type.container_auth_len();
        &self.region[self.directory_end..end]
    }
}
