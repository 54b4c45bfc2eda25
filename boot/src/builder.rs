//! builder.rs - Container image producer
//!
//! Assembles header, directory, per-component digests/signatures, optional
//! compression and container-level auth data into one image that
//! `ContainerView::parse` accepts. Used by host tooling and tests; firmware
//! only ever consumes images.
//!
//! Image order:
//!   header | entries (+hash data) | container auth | pad to 16 | data region
//! Data region: components in insertion order, each at the next offset
//! satisfying its alignment, signed components followed by their blob.

use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use log::debug;
use rsa::rand_core::CryptoRngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384};
use zerocopy::{AsBytes, U16, U32};

use crate::auth::{key_digest, AuthType, Digest, HashAlg, RsaPadding};
use crate::decompress::{CODEC_STORED, CODEC_ZLIB};
use crate::error::{ContainerError, Result};
use crate::layout::{
    ComponentAttributes, ComponentEntryHeader, ContainerFlags, ContainerHeader, ImageType, LoaderCompressedHeader,
    PublicKeyHeader, Signature, SignatureHeader, CONTAINER_HEADER_SIZE, CONTAINER_VERSION,
    KEY_TYPE_RSA, MAX_COMPONENTS, PUBLIC_KEY_IDENTIFIER, RSA_EXPONENT_SIZE, SIGNATURE_IDENTIFIER,
};

/// Header region is padded to this boundary before the data region starts.
pub const HEADER_REGION_ALIGN: usize = 16;
const ZLIB_LEVEL: u8 = 8;

/// Produces RSA signatures over pre-computed digests.
pub trait ImageSigner {
    /// Big-endian modulus (full modulus width) followed by the 4-byte
    /// big-endian public exponent.
    fn public_key(&self) -> Result<Vec<u8>>;

    /// Sign `digest` with the padding and hash `auth_type` names.
    fn sign(&self, auth_type: AuthType, digest: &[u8]) -> Result<Vec<u8>>;
}

/// Digest to provision in a key store for `signer`'s key.
pub fn signer_key_digest(signer: &dyn ImageSigner, alg: HashAlg) -> Result<Digest> {
    Ok(key_digest(alg, &signer.public_key()?))
}

/// Key bytes as containers embed them and key stores digest them:
/// modulus left-padded to the full modulus width, then the exponent as
/// 4 big-endian bytes.
pub fn rsa_key_bytes(key: &RsaPublicKey) -> Result<Vec<u8>> {
    let modulus = key.n().to_bytes_be();
    let exponent = key.e().to_bytes_be();
    if exponent.len() > RSA_EXPONENT_SIZE {
        return Err(ContainerError::Unsupported("public exponent wider than 32 bits"));
    }
    let mut out = vec![0u8; key.size() - modulus.len()];
    out.extend_from_slice(&modulus);
    out.resize(out.len() + RSA_EXPONENT_SIZE - exponent.len(), 0);
    out.extend_from_slice(&exponent);
    Ok(out)
}

/// `ImageSigner` over an RSA private key. PSS salts come from `rng`.
pub struct RsaSigner<R> {
    key: RsaPrivateKey,
    rng: RefCell<R>,
}

impl<R: CryptoRngCore> RsaSigner<R> {
    pub fn new(key: RsaPrivateKey, rng: R) -> Self {
        Self { key, rng: RefCell::new(rng) }
    }

    pub fn modulus_len(&self) -> usize {
        self.key.size()
    }
}

impl<R: CryptoRngCore> ImageSigner for RsaSigner<R> {
    fn public_key(&self) -> Result<Vec<u8>> {
        rsa_key_bytes(&self.key.to_public_key())
    }

    fn sign(&self, auth_type: AuthType, digest: &[u8]) -> Result<Vec<u8>> {
        let (modulus_len, padding) = auth_type.rsa().ok_or(ContainerError::InvalidParameter)?;
        if self.key.size() != modulus_len {
            return Err(ContainerError::InvalidParameter);
        }
        let mut rng = self.rng.borrow_mut();
        let signed = match (padding, auth_type.hash_alg()) {
            (RsaPadding::Pkcs1v15, Some(HashAlg::Sha256)) => self.key.sign(Pkcs1v15Sign::new::<Sha256>(), digest),
            (RsaPadding::Pkcs1v15, Some(HashAlg::Sha384)) => self.key.sign(Pkcs1v15Sign::new::<Sha384>(), digest),
            (RsaPadding::Pss, Some(HashAlg::Sha256)) => self.key.sign_with_rng(&mut *rng, Pss::new::<Sha256>(), digest),
            (RsaPadding::Pss, Some(HashAlg::Sha384)) => self.key.sign_with_rng(&mut *rng, Pss::new::<Sha384>(), digest),
            (_, None) => return Err(ContainerError::InvalidParameter),
        };
        signed.map_err(|_| ContainerError::InvalidParameter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    /// LZDM header around the raw bytes.
    Stored,
    Zlib,
}

#[derive(Debug, Clone)]
pub struct ComponentSpec {
    name: Signature,
    data: Vec<u8>,
    auth_type: AuthType,
    alignment: u8,
    compression: Compression,
}

impl ComponentSpec {
    pub fn new(name: Signature, data: impl Into<Vec<u8>>) -> Self {
        Self { name, data: data.into(), auth_type: AuthType::None, alignment: 0, compression: Compression::None }
    }

    pub fn auth(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// log2 of the required offset alignment.
    pub fn alignment(mut self, log2: u8) -> Self {
        self.alignment = log2;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let (tag, stream) = match self.compression {
            Compression::None => return Ok(self.data.clone()),
            Compression::Stored => (CODEC_STORED, self.data.clone()),
            Compression::Zlib => (CODEC_ZLIB, miniz_oxide::deflate::compress_to_vec_zlib(&self.data, ZLIB_LEVEL)),
        };
        let header = LoaderCompressedHeader {
            signature: tag,
            compressed_size: U32::new(to_u32(stream.len())?),
            size: U32::new(to_u32(self.data.len())?),
            version: U16::new(1),
            svn: 0,
            attribute: 0,
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&stream);
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    signature: Signature,
    svn: u8,
    image_type: ImageType,
    auth_type: AuthType,
    mono_signing: bool,
    components: Vec<ComponentSpec>,
}

impl ContainerBuilder {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            svn: 0,
            image_type: ImageType::Normal,
            auth_type: AuthType::None,
            mono_signing: false,
            components: Vec::new(),
        }
    }

    pub fn svn(mut self, svn: u8) -> Self {
        self.svn = svn;
        self
    }

    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    /// Container-level auth: header+directory, or everything when mono-signed.
    pub fn auth(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// One container signature; component auth types are written as none.
    pub fn mono_signing(mut self, enabled: bool) -> Self {
        self.mono_signing = enabled;
        self
    }

    pub fn component(mut self, spec: ComponentSpec) -> Self {
        self.components.push(spec);
        self
    }

    pub fn build(&self, signer: Option<&dyn ImageSigner>) -> Result<Vec<u8>> {
        if self.components.len() > MAX_COMPONENTS {
            return Err(ContainerError::InvalidParameter);
        }

        let mut data = Vec::new();
        let mut directory = Vec::new();
        for spec in &self.components {
            if spec.alignment >= 32 {
                return Err(ContainerError::InvalidParameter);
            }
            let payload = spec.payload()?;
            let auth_type = if self.mono_signing { AuthType::None } else { spec.auth_type };
            let (hash, blob) = component_auth(auth_type, &payload, signer)?;

            let offset = align_up(data.len(), 1usize << spec.alignment)?;
            data.resize(offset, 0);
            data.extend_from_slice(&payload);
            data.extend_from_slice(&blob);

            let mut attribute = ComponentAttributes::empty();
            attribute.set(ComponentAttributes::COMPRESSED, spec.compression != Compression::None);
            let entry = ComponentEntryHeader {
                name: spec.name.0,
                offset: U32::new(to_u32(offset)?),
                size: U32::new(to_u32(payload.len() + blob.len())?),
                attribute: attribute.bits(),
                alignment: spec.alignment,
                auth_type: auth_type.code(),
                hash_size: u8::try_from(hash.len()).map_err(|_| ContainerError::InvalidParameter)?,
            };
            directory.extend_from_slice(entry.as_bytes());
            directory.extend_from_slice(&hash);
        }

        let directory_end = CONTAINER_HEADER_SIZE + directory.len();
        let data_offset = align_up(directory_end + self.auth_type.container_auth_len(), HEADER_REGION_ALIGN)?;
        let mut flags = ContainerFlags::empty();
        flags.set(ContainerFlags::MONO_SIGNING, self.mono_signing);
        let header = ContainerHeader {
            signature: self.signature.0,
            version: CONTAINER_VERSION,
            svn: self.svn,
            data_offset: U16::new(u16::try_from(data_offset).map_err(|_| ContainerError::InvalidParameter)?),
            data_size: U32::new(to_u32(data.len())?),
            auth_type: self.auth_type.code(),
            image_type: self.image_type as u8,
            flags: flags.bits(),
            count: self.components.len() as u8,
        };

        let mut image = Vec::with_capacity(data_offset + data.len());
        image.extend_from_slice(header.as_bytes());
        image.extend_from_slice(&directory);
        let auth_data = if self.mono_signing {
            container_auth(self.auth_type, &[&image, &data], signer)?
        } else {
            container_auth(self.auth_type, &[&image], signer)?
        };
        image.extend_from_slice(&auth_data);
        image.resize(data_offset, 0);
        image.extend_from_slice(&data);

        debug!(
            target: "builder",
            "{}: {} components, header {} bytes, data {} bytes",
            self.signature,
            self.components.len(),
            data_offset,
            data.len()
        );
        Ok(image)
    }
}

/// (hash_data, trailing blob) for one component payload.
fn component_auth(auth_type: AuthType, payload: &[u8], signer: Option<&dyn ImageSigner>) -> Result<(Vec<u8>, Vec<u8>)> {
    let Some(alg) = auth_type.hash_alg() else {
        return Ok((Vec::new(), Vec::new()));
    };
    let digest = alg.digest(&[payload]);
    let blob = if auth_type.is_signed() {
        signed_blob(signer.ok_or(ContainerError::InvalidParameter)?, auth_type, &digest)?
    } else {
        Vec::new()
    };
    Ok((digest.as_bytes().to_vec(), blob))
}

fn container_auth(auth_type: AuthType, parts: &[&[u8]], signer: Option<&dyn ImageSigner>) -> Result<Vec<u8>> {
    let Some(alg) = auth_type.hash_alg() else {
        return Ok(Vec::new());
    };
    let digest = alg.digest(parts);
    if auth_type.is_signed() {
        signed_blob(signer.ok_or(ContainerError::InvalidParameter)?, auth_type, &digest)
    } else {
        Ok(digest.as_bytes().to_vec())
    }
}

/// SIGN header + signature + PUBK header + key, as `SignedBlob::parse` reads it.
pub fn signed_blob(signer: &dyn ImageSigner, auth_type: AuthType, digest: &Digest) -> Result<Vec<u8>> {
    let (modulus_len, padding) = auth_type.rsa().ok_or(ContainerError::InvalidParameter)?;
    let alg = auth_type.hash_alg().ok_or(ContainerError::InvalidParameter)?;
    let key = signer.public_key()?;
    let signature = signer.sign(auth_type, digest.as_bytes())?;
    if key.len() != modulus_len + RSA_EXPONENT_SIZE || signature.len() != modulus_len {
        return Err(ContainerError::InvalidParameter);
    }

    let sig_header = SignatureHeader {
        identifier: SIGNATURE_IDENTIFIER,
        sig_size: U16::new(modulus_len as u16),
        sig_type: padding.sig_type(),
        hash_alg: alg.code(),
    };
    let key_header = PublicKeyHeader {
        identifier: PUBLIC_KEY_IDENTIFIER,
        key_size: U16::new(key.len() as u16),
        key_type: KEY_TYPE_RSA,
        reserved: 0,
    };
    let mut blob = Vec::with_capacity(auth_type.signed_blob_len());
    blob.extend_from_slice(sig_header.as_bytes());
    blob.extend_from_slice(&signature);
    blob.extend_from_slice(key_header.as_bytes());
    blob.extend_from_slice(&key);
    Ok(blob)
}

fn align_up(value: usize, align: usize) -> Result<usize> {
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
        .ok_or(ContainerError::InvalidParameter)
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| ContainerError::InvalidParameter)
}
