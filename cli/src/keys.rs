// cli/src/keys.rs - PEM keys, signers and provisioned key digests

use std::fs;
use std::path::Path;

use clap::{Args, ValueEnum};
use container_boot::auth::key_digest;
use container_boot::builder::{rsa_key_bytes, RsaSigner};
use container_boot::{Digest, HashAlg, KeyHashStore, KeyUsage};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UsageArg {
    Master,
    ConfigData,
    FirmwareUpdate,
    Os,
    ContainerDefault,
    Oem,
}

impl From<UsageArg> for KeyUsage {
    fn from(usage: UsageArg) -> Self {
        match usage {
            UsageArg::Master => KeyUsage::MASTER,
            UsageArg::ConfigData => KeyUsage::CONFIG_DATA,
            UsageArg::FirmwareUpdate => KeyUsage::FIRMWARE_UPDATE,
            UsageArg::Os => KeyUsage::OS,
            UsageArg::ContainerDefault => KeyUsage::CONTAINER_DEFAULT,
            UsageArg::Oem => KeyUsage::OEM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HashArg {
    Sha256,
    Sha384,
}

impl From<HashArg> for HashAlg {
    fn from(alg: HashArg) -> Self {
        match alg {
            HashArg::Sha256 => HashAlg::Sha256,
            HashArg::Sha384 => HashAlg::Sha384,
        }
    }
}

/// Trust material shared by `verify` and `extract`.
#[derive(Debug, Args)]
pub struct TrustArgs {
    /// PEM key (private or public) to trust
    #[arg(long = "trust", value_name = "PEM")]
    pub keys: Vec<std::path::PathBuf>,

    /// Hex key digest to trust (32 bytes SHA-256 or 48 bytes SHA-384)
    #[arg(long = "key-hash", value_name = "HEX")]
    pub key_hashes: Vec<String>,

    /// Usage the trusted keys are provisioned for and the loader checks
    #[arg(long, value_enum, default_value = "container-default")]
    pub usage: UsageArg,

    /// Reject containers whose SVN is below this
    #[arg(long, default_value_t = 0)]
    pub min_svn: u8,
}

impl TrustArgs {
    pub fn key_store(&self) -> Result<KeyHashStore> {
        let usage = KeyUsage::from(self.usage);
        let mut store = KeyHashStore::new();
        for path in &self.keys {
            let key = load_public_key(path)?;
            for alg in [HashAlg::Sha256, HashAlg::Sha384] {
                store.add_digest(usage, public_key_digest(&key, alg)?)?;
            }
            debug!(key = %path.display(), "trusting key");
        }
        for text in &self.key_hashes {
            let raw = hex::decode(text.trim()).map_err(|e| CliError::Layout(format!("key hash {text}: {e}")))?;
            let alg = match raw.len() {
                32 => HashAlg::Sha256,
                48 => HashAlg::Sha384,
                n => return Err(CliError::Layout(format!("key hash {text}: {n} bytes is not a SHA-256/384 digest"))),
            };
            store.add(usage, alg, &raw)?;
        }
        Ok(store)
    }
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| CliError::io(path, e))
}

fn key_error(path: &Path, message: impl ToString) -> CliError {
    CliError::Key { path: path.to_path_buf(), message: message.to_string() }
}

/// PKCS#8 or PKCS#1 private key.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| key_error(path, e))
}

/// Public half of a private key, or a SPKI / PKCS#1 public key.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = read_pem(path)?;
    if let Ok(private) = RsaPrivateKey::from_pkcs8_pem(&pem).or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem)) {
        return Ok(private.to_public_key());
    }
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| key_error(path, e))
}

pub fn signer(path: &Path) -> Result<RsaSigner<OsRng>> {
    Ok(RsaSigner::new(load_private_key(path)?, OsRng))
}

pub fn public_key_digest(key: &RsaPublicKey, alg: HashAlg) -> Result<Digest> {
    Ok(key_digest(alg, &rsa_key_bytes(key)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_boot::builder::{signer_key_digest, ImageSigner};

    const PEM: &str = include_str!("../../boot/tests/data/test_rsa2048.pem");

    #[test]
    fn public_digest_matches_signer_digest() {
        let private = RsaPrivateKey::from_pkcs8_pem(PEM).unwrap();
        let public = private.to_public_key();
        let signer = RsaSigner::new(private, OsRng);
        assert_eq!(signer.public_key().unwrap(), rsa_key_bytes(&public).unwrap());
        for alg in [HashAlg::Sha256, HashAlg::Sha384] {
            assert_eq!(public_key_digest(&public, alg).unwrap(), signer_key_digest(&signer, alg).unwrap());
        }
    }

    #[test]
    fn key_hash_arguments_pick_the_algorithm_by_length() {
        let args = TrustArgs {
            keys: vec![],
            key_hashes: vec!["ab".repeat(32), "cd".repeat(48)],
            usage: UsageArg::Os,
            min_svn: 0,
        };
        assert_eq!(args.key_store().unwrap().len(), 2);

        let bad = TrustArgs { key_hashes: vec!["ab".repeat(20)], ..args };
        assert!(matches!(bad.key_store(), Err(CliError::Layout(_))));
    }
}
