//! Shared fixtures: PEM signing keys, key stores and a fake address space.
#![allow(dead_code)]

use container_boot::builder::{signer_key_digest, ImageSigner, RsaSigner};
use container_boot::{AuthType, HashAlg, KeyHashStore, KeyUsage, Signature};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

pub const BASE: u64 = 0x8000_0000;

const RSA2048_PEM: &str = include_str!("../data/test_rsa2048.pem");
const RSA3072_PEM: &str = include_str!("../data/test_rsa3072.pem");

pub fn sig(tag: &[u8; 4]) -> Signature {
    Signature::new(*tag)
}

pub fn signer(bits: usize) -> RsaSigner<StdRng> {
    let pem = match bits {
        2048 => RSA2048_PEM,
        3072 => RSA3072_PEM,
        other => panic!("no {other}-bit fixture"),
    };
    let key = RsaPrivateKey::from_pkcs8_pem(pem).expect("fixture key parses");
    RsaSigner::new(key, StdRng::seed_from_u64(0x5EED))
}

/// Fixture signer whose modulus fits `auth`.
pub fn signer_for(auth: AuthType) -> RsaSigner<StdRng> {
    match auth.rsa() {
        Some((384, _)) => signer(3072),
        _ => signer(2048),
    }
}

/// Key store trusting `signer` for `usage` under both digest widths.
pub fn trusting(signer: &dyn ImageSigner, usage: KeyUsage) -> KeyHashStore {
    let mut keys = KeyHashStore::new();
    for alg in [HashAlg::Sha256, HashAlg::Sha384] {
        keys.add_digest(usage, signer_key_digest(signer, alg).unwrap()).unwrap();
    }
    keys
}

pub fn default_trust(signer: &dyn ImageSigner) -> KeyHashStore {
    trusting(signer, KeyUsage::CONTAINER_DEFAULT)
}
