// cli/src/layout.rs - TOML container layouts
//
//   signature = "BOOT"
//   svn = 1
//   auth = "rsa2048-pkcs1-sha256"
//   key = "keys/oem.pem"
//
//   [[component]]
//   name = "SG1A"
//   file = "stage1a.bin"
//   auth = "sha256"
//   alignment = 12
//   compression = "zlib"
//
// Relative paths resolve against the layout file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use container_boot::builder::{ComponentSpec, Compression, ContainerBuilder, ImageSigner};
use container_boot::{AuthType, ImageType, Signature};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CliError, Result};
use crate::keys;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthSpec {
    #[default]
    None,
    Sha256,
    Sha384,
    Rsa2048Pkcs1Sha256,
    Rsa3072Pkcs1Sha384,
    Rsa2048PssSha256,
    Rsa3072PssSha384,
}

impl From<AuthSpec> for AuthType {
    fn from(auth: AuthSpec) -> Self {
        match auth {
            AuthSpec::None => AuthType::None,
            AuthSpec::Sha256 => AuthType::Sha256,
            AuthSpec::Sha384 => AuthType::Sha384,
            AuthSpec::Rsa2048Pkcs1Sha256 => AuthType::Rsa2048Pkcs1Sha256,
            AuthSpec::Rsa3072Pkcs1Sha384 => AuthType::Rsa3072Pkcs1Sha384,
            AuthSpec::Rsa2048PssSha256 => AuthType::Rsa2048PssSha256,
            AuthSpec::Rsa3072PssSha384 => AuthType::Rsa3072PssSha384,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageTypeSpec {
    #[default]
    Normal,
    ClassicLinux,
    Multiboot,
}

impl From<ImageTypeSpec> for ImageType {
    fn from(image: ImageTypeSpec) -> Self {
        match image {
            ImageTypeSpec::Normal => ImageType::Normal,
            ImageTypeSpec::ClassicLinux => ImageType::ClassicLinux,
            ImageTypeSpec::Multiboot => ImageType::Multiboot,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionSpec {
    #[default]
    None,
    Stored,
    Zlib,
}

impl From<CompressionSpec> for Compression {
    fn from(c: CompressionSpec) -> Self {
        match c {
            CompressionSpec::None => Compression::None,
            CompressionSpec::Stored => Compression::Stored,
            CompressionSpec::Zlib => Compression::Zlib,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    pub signature: String,
    #[serde(default)]
    pub svn: u8,
    #[serde(default)]
    pub image_type: ImageTypeSpec,
    #[serde(default)]
    pub auth: AuthSpec,
    /// Private key for every signed auth type in this layout.
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub mono_signing: bool,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentLayout>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentLayout {
    pub name: String,
    pub file: PathBuf,
    #[serde(default)]
    pub auth: AuthSpec,
    /// log2 of the offset alignment
    #[serde(default)]
    pub alignment: u8,
    #[serde(default)]
    pub compression: CompressionSpec,
}

/// Four ASCII characters; shorter names are padded with spaces.
pub fn parse_signature(text: &str) -> Result<Signature> {
    let bytes = text.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
        return Err(CliError::Layout(format!("'{text}' is not a 1-4 character ASCII signature")));
    }
    let mut tag = [b' '; 4];
    tag[..bytes.len()].copy_from_slice(bytes);
    Ok(Signature::new(tag))
}

impl Layout {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
        Ok(toml::from_str(&text)?)
    }

    fn is_signed(&self) -> bool {
        let container = AuthType::from(self.auth).is_signed();
        container || (!self.mono_signing && self.components.iter().any(|c| AuthType::from(c.auth).is_signed()))
    }

    /// Read every component file under `base_dir` and produce the image.
    pub fn build(&self, base_dir: &Path) -> Result<Vec<u8>> {
        let mut builder = ContainerBuilder::new(parse_signature(&self.signature)?)
            .svn(self.svn)
            .image_type(self.image_type.into())
            .auth(self.auth.into())
            .mono_signing(self.mono_signing);

        for component in &self.components {
            let path = base_dir.join(&component.file);
            let data = fs::read(&path).map_err(|e| CliError::io(&path, e))?;
            debug!(name = %component.name, bytes = data.len(), "component");
            builder = builder.component(
                ComponentSpec::new(parse_signature(&component.name)?, data)
                    .auth(component.auth.into())
                    .alignment(component.alignment)
                    .compression(component.compression.into()),
            );
        }

        let signer = match (&self.key, self.is_signed()) {
            (Some(key), _) => Some(keys::signer(&base_dir.join(key))?),
            (None, true) => return Err(CliError::Layout("signed auth type requires `key`".into())),
            (None, false) => None,
        };
        let image = builder.build(signer.as_ref().map(|s| s as &dyn ImageSigner))?;
        info!(signature = %self.signature, bytes = image.len(), "container built");
        Ok(image)
    }
}
