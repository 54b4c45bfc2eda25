//! auth.rs - Authentication engine (digests + RSA signature blobs)
//!
//! One entry point, `Authenticator::authenticate`, takes:
//!   - the auth type code
//!   - the message as a list of byte slices (hashed in order, never copied)
//!   - an optional expected digest (directory hash data)
//!   - the trailing auth data (raw digest or SIGN/PUBK blob)
//!
//! Every failure is a `SecurityViolation`, including malformed blobs and
//! untrusted keys. Callers must not touch the bytes after an error.
//!
//! Signed blob layout:
//!   SignatureHeader  "SIGN" | sig_size u16 | sig_type u8 | hash_alg u8
//!   signature        sig_size bytes (== modulus length)
//!   PublicKeyHeader  "PUBK" | key_size u16 | key_type u8 | reserved u8
//!   modulus          big-endian, modulus length
//!   exponent         big-endian, 4 bytes

use log::{debug, warn};
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPublicKey};
use rsa::traits::PublicKeyParts;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;
use zerocopy::FromBytes;

use crate::error::{ContainerError, Result};
use crate::keys::{KeyStore, KeyUsage};
use crate::layout::{
    PublicKeyHeader, SignatureHeader, KEY_TYPE_RSA, PUBLIC_KEY_IDENTIFIER, RSA_EXPONENT_SIZE,
    SIGNATURE_IDENTIFIER, SIG_TYPE_PKCS1, SIG_TYPE_PSS,
};

pub const MAX_DIGEST_LEN: usize = 48;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }

    /// Code used in the SIGN header.
    pub const fn code(self) -> u8 {
        match self {
            HashAlg::Sha256 => 1,
            HashAlg::Sha384 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(HashAlg::Sha256),
            2 => Some(HashAlg::Sha384),
            _ => None,
        }
    }

    /// Hash `parts` in order as one message.
    pub fn digest(self, parts: &[&[u8]]) -> Digest {
        match self {
            HashAlg::Sha256 => Digest::compute::<Sha256>(self, parts),
            HashAlg::Sha384 => Digest::compute::<Sha384>(self, parts),
        }
    }
}

/// A SHA-256 or SHA-384 digest, kept inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    alg: HashAlg,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Digest {
    fn compute<D: digest::Digest>(alg: HashAlg, parts: &[&[u8]]) -> Self {
        let mut hasher = D::new();
        for part in parts {
            hasher.update(part);
        }
        let out = hasher.finalize();
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        bytes[..out.len()].copy_from_slice(&out);
        Self { alg, bytes }
    }

    /// Wrap raw digest bytes. The length must match `alg`.
    pub fn from_slice(alg: HashAlg, raw: &[u8]) -> Option<Self> {
        if raw.len() != alg.digest_len() {
            return None;
        }
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self { alg, bytes })
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.alg.digest_len()]
    }

    /// Constant-time comparison against raw bytes of any length.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.as_bytes().ct_eq(other).into()
    }
}

impl core::fmt::Debug for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}:", self.alg)?;
        for b in self.as_bytes() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1v15,
    Pss,
}

impl RsaPadding {
    pub const fn sig_type(self) -> u8 {
        match self {
            RsaPadding::Pkcs1v15 => SIG_TYPE_PKCS1,
            RsaPadding::Pss => SIG_TYPE_PSS,
        }
    }
}

/// Auth type codes as stored in headers and directory entries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    None = 0,
    Sha256 = 1,
    Sha384 = 2,
    Rsa2048Pkcs1Sha256 = 3,
    Rsa3072Pkcs1Sha384 = 4,
    Rsa2048PssSha256 = 5,
    Rsa3072PssSha384 = 6,
}

impl TryFrom<u8> for AuthType {
    type Error = ContainerError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => AuthType::None,
            1 => AuthType::Sha256,
            2 => AuthType::Sha384,
            3 => AuthType::Rsa2048Pkcs1Sha256,
            4 => AuthType::Rsa3072Pkcs1Sha384,
            5 => AuthType::Rsa2048PssSha256,
            6 => AuthType::Rsa3072PssSha384,
            _ => return Err(ContainerError::Unsupported("auth type")),
        })
    }
}

impl AuthType {
    pub const ALL: [AuthType; 7] = [
        AuthType::None,
        AuthType::Sha256,
        AuthType::Sha384,
        AuthType::Rsa2048Pkcs1Sha256,
        AuthType::Rsa3072Pkcs1Sha384,
        AuthType::Rsa2048PssSha256,
        AuthType::Rsa3072PssSha384,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn hash_alg(self) -> Option<HashAlg> {
        match self {
            AuthType::None => None,
            AuthType::Sha256 | AuthType::Rsa2048Pkcs1Sha256 | AuthType::Rsa2048PssSha256 => Some(HashAlg::Sha256),
            AuthType::Sha384 | AuthType::Rsa3072Pkcs1Sha384 | AuthType::Rsa3072PssSha384 => Some(HashAlg::Sha384),
        }
    }

    /// (modulus bytes, padding) for signed types.
    pub const fn rsa(self) -> Option<(usize, RsaPadding)> {
        match self {
            AuthType::Rsa2048Pkcs1Sha256 => Some((256, RsaPadding::Pkcs1v15)),
            AuthType::Rsa3072Pkcs1Sha384 => Some((384, RsaPadding::Pkcs1v15)),
            AuthType::Rsa2048PssSha256 => Some((256, RsaPadding::Pss)),
            AuthType::Rsa3072PssSha384 => Some((384, RsaPadding::Pss)),
            _ => None,
        }
    }

    pub const fn is_signed(self) -> bool {
        self.rsa().is_some()
    }

    /// Length of the SIGN/PUBK blob trailing a signed image; 0 otherwise.
    pub const fn signed_blob_len(self) -> usize {
        match self.rsa() {
            Some((modulus, _)) => HEADER_LEN + modulus + HEADER_LEN + modulus + RSA_EXPONENT_SIZE,
            None => 0,
        }
    }

    /// Length of container-level auth data after the directory.
    pub const fn container_auth_len(self) -> usize {
        match (self.hash_alg(), self.is_signed()) {
            (None, _) => 0,
            (Some(alg), false) => alg.digest_len(),
            (Some(_), true) => self.signed_blob_len(),
        }
    }
}

/// A parsed SIGN/PUBK blob.
#[derive(Debug, Clone, Copy)]
pub struct SignedBlob<'a> {
    pub signature: &'a [u8],
    /// modulus || exponent, the bytes key digests are computed over.
    pub key_data: &'a [u8],
    pub modulus: &'a [u8],
    pub exponent: &'a [u8],
}

impl<'a> SignedBlob<'a> {
    pub fn parse(auth_type: AuthType, blob: &'a [u8]) -> Result<Self> {
        let (modulus_len, padding) = auth_type.rsa().ok_or(ContainerError::SecurityViolation("not a signed auth type"))?;
        let alg = auth_type.hash_alg().ok_or(ContainerError::SecurityViolation("not a signed auth type"))?;
        if blob.len() != auth_type.signed_blob_len() {
            return Err(ContainerError::SecurityViolation("signature blob length"));
        }

        let sig_header = SignatureHeader::read_from_prefix(blob)
            .ok_or(ContainerError::SecurityViolation("signature header truncated"))?;
        if sig_header.identifier != SIGNATURE_IDENTIFIER
            || sig_header.sig_size.get() as usize != modulus_len
            || sig_header.sig_type != padding.sig_type()
            || sig_header.hash_alg != alg.code()
        {
            return Err(ContainerError::SecurityViolation("signature header mismatch"));
        }
        let sig_end = HEADER_LEN + modulus_len;
        let signature = &blob[HEADER_LEN..sig_end];

        let key_header = PublicKeyHeader::read_from_prefix(&blob[sig_end..])
            .ok_or(ContainerError::SecurityViolation("public key header truncated"))?;
        if key_header.identifier != PUBLIC_KEY_IDENTIFIER
            || key_header.key_size.get() as usize != modulus_len + RSA_EXPONENT_SIZE
            || key_header.key_type != KEY_TYPE_RSA
        {
            return Err(ContainerError::SecurityViolation("public key header mismatch"));
        }
        let key_data = &blob[sig_end + HEADER_LEN..];
        let (modulus, exponent) = key_data.split_at(modulus_len);

        Ok(Self { signature, key_data, modulus, exponent })
    }
}

/// Digest a public key the way key stores index it: modulus || exponent.
pub fn key_digest(alg: HashAlg, key_data: &[u8]) -> Digest {
    alg.digest(&[key_data])
}

/// Successful authentication outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub auth_type: AuthType,
    /// Message digest, absent for `AuthType::None`.
    pub digest: Option<Digest>,
}

impl Verdict {
    pub const UNAUTHENTICATED: Verdict = Verdict { auth_type: AuthType::None, digest: None };
}

/// Stateless checker bound to a key store and the usage it must grant.
#[derive(Clone, Copy)]
pub struct Authenticator<'k> {
    keys: &'k dyn KeyStore,
    usage: KeyUsage,
}

impl<'k> Authenticator<'k> {
    pub fn new(keys: &'k dyn KeyStore, usage: KeyUsage) -> Self {
        Self { keys, usage }
    }

    /// Authenticate `message` (the concatenation of its parts).
    ///
    /// Hash types compare against `expected` (required). Signed types
    /// compare against `expected` when given, then check that the embedded
    /// key is trusted, then verify the signature over the digest.
    pub fn authenticate(
        &self,
        auth_type: AuthType,
        message: &[&[u8]],
        expected: Option<&[u8]>,
        auth_data: &[u8],
    ) -> Result<Verdict> {
        let Some(alg) = auth_type.hash_alg() else {
            return Ok(Verdict::UNAUTHENTICATED);
        };
        let digest = alg.digest(message);

        if !auth_type.is_signed() {
            let expected = expected.ok_or(ContainerError::SecurityViolation("missing digest"))?;
            if !digest.matches(expected) {
                warn!(target: "auth", "{:?} digest mismatch", auth_type);
                return Err(ContainerError::SecurityViolation("digest mismatch"));
            }
            return Ok(Verdict { auth_type, digest: Some(digest) });
        }

        if let Some(expected) = expected {
            if !digest.matches(expected) {
                warn!(target: "auth", "{:?} image digest mismatch", auth_type);
                return Err(ContainerError::SecurityViolation("digest mismatch"));
            }
        }

        let blob = SignedBlob::parse(auth_type, auth_data)?;
        if !self.keys.is_trusted(self.usage, &key_digest(alg, blob.key_data)) {
            warn!(target: "auth", "public key not trusted for {:?}", self.usage);
            return Err(ContainerError::SecurityViolation("untrusted public key"));
        }
        verify_rsa(auth_type, &blob, digest.as_bytes())?;

        debug!(target: "auth", "{:?} signature ok", auth_type);
        Ok(Verdict { auth_type, digest: Some(digest) })
    }
}

fn verify_rsa(auth_type: AuthType, blob: &SignedBlob<'_>, hashed: &[u8]) -> Result<()> {
    let (modulus_len, padding) = auth_type.rsa().ok_or(ContainerError::SecurityViolation("not a signed auth type"))?;
    let n = BigUint::from_bytes_be(blob.modulus);
    let e = BigUint::from_bytes_be(blob.exponent);
    let key = RsaPublicKey::new(n, e).map_err(|_| ContainerError::SecurityViolation("malformed public key"))?;
    if key.size() != modulus_len {
        return Err(ContainerError::SecurityViolation("public key size mismatch"));
    }

    let outcome = match (padding, auth_type.hash_alg()) {
        (RsaPadding::Pkcs1v15, Some(HashAlg::Sha256)) => key.verify(Pkcs1v15Sign::new::<Sha256>(), hashed, blob.signature),
        (RsaPadding::Pkcs1v15, Some(HashAlg::Sha384)) => key.verify(Pkcs1v15Sign::new::<Sha384>(), hashed, blob.signature),
        (RsaPadding::Pss, Some(HashAlg::Sha256)) => key.verify(Pss::new::<Sha256>(), hashed, blob.signature),
        (RsaPadding::Pss, Some(HashAlg::Sha384)) => key.verify(Pss::new::<Sha384>(), hashed, blob.signature),
        (_, None) => return Err(ContainerError::SecurityViolation("not a signed auth type")),
    };
    outcome.map_err(|_| {
        warn!(target: "auth", "{:?} signature rejected", auth_type);
        ContainerError::SecurityViolation("signature verification failed")
    })
}
