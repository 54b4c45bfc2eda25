//! decompress.rs - Decompression adapter
//!
//! Compressed components start with a 16-byte `LoaderCompressedHeader`
//! whose tag selects the codec. The adapter asks the codec for the output
//! and scratch sizes first, checks them against what the caller has, and
//! only then decodes. A corrupt stream is `DecodeFailed`, never a security
//! verdict: authentication has already run over the compressed bytes.

use alloc::vec::Vec;

use log::{debug, warn};
use zerocopy::FromBytes;

use crate::error::{ContainerError, Result};
use crate::layout::{LoaderCompressedHeader, COMPRESSED_HEADER_SIZE};

pub const CODEC_STORED: [u8; 4] = *b"LZDM";
pub const CODEC_ZLIB: [u8; 4] = *b"ZLIB";
pub const CODEC_LZ4: [u8; 4] = *b"LZ4 ";
pub const CODEC_LZMA: [u8; 4] = *b"LZMA";

/// Output and scratch requirements of one compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressInfo {
    pub destination_size: usize,
    pub scratch_size: usize,
}

/// A codec over complete `LoaderCompressedHeader`-prefixed payloads.
pub trait Decompressor {
    fn info(&self, source: &[u8]) -> Result<DecompressInfo>;

    /// Decode into `destination` (at least `destination_size` long).
    /// Returns the number of bytes written.
    fn decompress(&self, source: &[u8], destination: &mut [u8], scratch: &mut [u8]) -> Result<usize>;
}

/// Split a payload into its header and the compressed stream.
pub fn split_payload(source: &[u8]) -> Result<(LoaderCompressedHeader, &[u8])> {
    let header = LoaderCompressedHeader::read_from_prefix(source)
        .ok_or(ContainerError::DecodeFailed("compressed header truncated"))?;
    let stream_len = header.compressed_size.get() as usize;
    let stream = source[COMPRESSED_HEADER_SIZE..]
        .get(..stream_len)
        .ok_or(ContainerError::DecodeFailed("compressed stream truncated"))?;
    Ok((header, stream))
}

/// LZDM (stored) and ZLIB. LZ4 and LZMA are recognised but not built in.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCodec;

impl Decompressor for BuiltinCodec {
    fn info(&self, source: &[u8]) -> Result<DecompressInfo> {
        let (header, stream) = split_payload(source)?;
        let destination_size = header.size.get() as usize;
        match header.signature {
            CODEC_STORED if stream.len() != destination_size => {
                Err(ContainerError::DecodeFailed("stored payload length mismatch"))
            }
            CODEC_STORED | CODEC_ZLIB => Ok(DecompressInfo { destination_size, scratch_size: 0 }),
            CODEC_LZ4 | CODEC_LZMA => Err(ContainerError::Unsupported("codec")),
            _ => Err(ContainerError::DecodeFailed("unknown compression tag")),
        }
    }

    fn decompress(&self, source: &[u8], destination: &mut [u8], _scratch: &mut [u8]) -> Result<usize> {
        let info = self.info(source)?;
        let (header, stream) = split_payload(source)?;
        let out = destination
            .get_mut(..info.destination_size)
            .ok_or(ContainerError::BufferTooSmall { required: info.destination_size })?;

        match header.signature {
            CODEC_STORED => {
                out.copy_from_slice(stream);
                Ok(out.len())
            }
            CODEC_ZLIB => {
                let written = miniz_oxide::inflate::decompress_slice_iter_to_slice(out, core::iter::once(stream), true, false)
                    .map_err(|status| {
                        warn!(target: "codec", "zlib stream rejected: {:?}", status);
                        ContainerError::DecodeFailed("corrupt zlib stream")
                    })?;
                if written != info.destination_size {
                    return Err(ContainerError::DecodeFailed("decoded length mismatch"));
                }
                Ok(written)
            }
            _ => Err(ContainerError::Unsupported("codec")),
        }
    }
}

/// Where decoded bytes end up.
pub enum Output<'b> {
    Caller(&'b mut [u8]),
    Allocate,
}

/// Size-check, allocate scratch and decode `source`.
///
/// With a caller buffer the decoded bytes land at its start and the buffer
/// is handed back; otherwise a new vector of exactly the decoded size is
/// returned.
pub fn decompress_into<'b>(codec: &dyn Decompressor, source: &[u8], output: Output<'b>) -> Result<Decoded<'b>> {
    let info = codec.info(source)?;

    let mut scratch = Vec::new();
    scratch.try_reserve_exact(info.scratch_size).map_err(|_| ContainerError::OutOfResources)?;
    scratch.resize(info.scratch_size, 0);

    let decoded = match output {
        Output::Caller(buffer) => {
            if buffer.len() < info.destination_size {
                return Err(ContainerError::BufferTooSmall { required: info.destination_size });
            }
            let written = codec.decompress(source, buffer, &mut scratch)?;
            Decoded::Caller(buffer, written)
        }
        Output::Allocate => {
            let mut out = Vec::new();
            out.try_reserve_exact(info.destination_size).map_err(|_| ContainerError::OutOfResources)?;
            out.resize(info.destination_size, 0);
            let written = codec.decompress(source, &mut out, &mut scratch)?;
            out.truncate(written);
            Decoded::Owned(out)
        }
    };
    debug!(target: "codec", "decoded {} -> {} bytes", source.len(), decoded.len());
    Ok(decoded)
}

pub enum Decoded<'b> {
    Caller(&'b mut [u8], usize),
    Owned(Vec<u8>),
}

impl Decoded<'_> {
    pub fn len(&self) -> usize {
        match self {
            Decoded::Caller(_, n) => *n,
            Decoded::Owned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
