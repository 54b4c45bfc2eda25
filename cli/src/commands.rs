// cli/src/commands.rs - containerctl subcommands
//
// Images are mapped at a fixed fake address and driven through the same
// Loader firmware uses, so `verify` and `extract` accept exactly what a
// boot stage would.

use std::fs;
use std::path::Path;

use container_boot::layout::ContainerView;
use container_boot::{
    ContainerRegistry, HashAlg, KeyUsage, LoadPhase, LoadSnapshot, Loader, MemoryWindow, Signature,
};
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};
use crate::keys::{self, TrustArgs};
use crate::layout::{parse_signature, Layout};

const IMAGE_BASE: u64 = 0x8000_0000;

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CliError::io(path, e))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| CliError::io(path, e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn create(layout_path: &Path, output: &Path) -> Result<()> {
    let layout = Layout::load(layout_path)?;
    let base_dir = layout_path.parent().unwrap_or_else(|| Path::new("."));
    let image = layout.build(base_dir)?;
    write(output, &image)?;
    println!("[create] {} -> {} ({} bytes)", layout.signature, output.display(), image.len());
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ContainerReport {
    pub signature: String,
    pub version: u8,
    pub svn: u8,
    pub image_type: String,
    pub auth_type: String,
    pub mono_signed: bool,
    pub data_offset: u32,
    pub data_size: u32,
    pub sha256: String,
    pub components: Vec<ComponentReport>,
}

#[derive(Debug, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub alignment: u8,
    pub auth_type: String,
    pub compressed: bool,
    pub hash: String,
}

impl ContainerReport {
    pub fn from_image(bytes: &[u8]) -> Result<Self> {
        let view = ContainerView::parse(bytes)?;
        let components = view
            .entries()
            .iter()
            .map(|e| ComponentReport {
                name: e.name().to_string(),
                offset: e.offset(),
                size: e.size(),
                alignment: e.alignment(),
                auth_type: match e.auth_type() {
                    Ok(t) => format!("{t:?}"),
                    Err(_) => format!("unknown({})", e.auth_code()),
                },
                compressed: e.is_compressed(),
                hash: hex::encode(e.hash_data()),
            })
            .collect();
        Ok(Self {
            signature: view.signature().to_string(),
            version: view.header().version,
            svn: view.svn(),
            image_type: format!("{:?}", view.image_type()),
            auth_type: format!("{:?}", view.auth_type()),
            mono_signed: view.is_mono_signed(),
            data_offset: view.data_offset(),
            data_size: view.data_size(),
            sha256: hex::encode(Sha256::digest(bytes)),
            components,
        })
    }
}

pub fn show(image: &Path, json: bool) -> Result<()> {
    let report = ContainerReport::from_image(&read(image)?)?;
    if json {
        return print_json(&report);
    }
    println!("[show] container {} v{} svn {}", report.signature, report.version, report.svn);
    println!("[show] image type: {}", report.image_type);
    println!(
        "[show] auth: {}{}",
        report.auth_type,
        if report.mono_signed { " (mono-signed)" } else { "" }
    );
    println!("[show] data: offset {:#x} size {:#x}", report.data_offset, report.data_size);
    println!("[show] sha256: {}", report.sha256);
    for c in &report.components {
        println!(
            "  {:<4}  off {:#010x}  size {:#010x}  align 2^{:<2}  {}{}",
            c.name,
            c.offset,
            c.size,
            c.alignment,
            c.auth_type,
            if c.compressed { "  compressed" } else { "" }
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub container: String,
    pub components: Vec<ComponentVerdict>,
}

#[derive(Debug, Serialize)]
pub struct ComponentVerdict {
    pub name: String,
    pub ok: bool,
    /// A later entry whose name an earlier entry already answers for.
    pub shadowed: bool,
    pub length: Option<usize>,
    pub digest: Option<String>,
    pub error: Option<String>,
}

/// Register the image and load it through a trust-configured loader.
fn with_loader<T>(
    bytes: &[u8],
    trust: &TrustArgs,
    f: impl FnOnce(&Loader<'_>, &mut ContainerRegistry, Signature) -> Result<T>,
) -> Result<T> {
    let keys = trust.key_store()?;
    let memory = MemoryWindow::new(IMAGE_BASE, bytes);
    let loader = Loader::new(&memory, &keys)
        .with_key_usage(KeyUsage::from(trust.usage))
        .with_min_svn(trust.min_svn);
    let mut registry = ContainerRegistry::with_capacity(1)?;
    let mut trace = |phase: LoadPhase, snap: &LoadSnapshot<'_>| {
        debug!(?phase, container = %snap.container, bytes = snap.data.len(), "register");
    };
    let container = loader.register_container(&mut registry, IMAGE_BASE, Some(&mut trace))?;
    f(&loader, &mut registry, container)
}

pub fn verify(image: &Path, trust: &TrustArgs, json: bool) -> Result<()> {
    let bytes = read(image)?;
    let report = with_loader(&bytes, trust, |loader, registry, container| {
        let names: Vec<Signature> = loader.components(registry, container)?.collect();
        let mut components: Vec<ComponentVerdict> = Vec::with_capacity(names.len());
        for (i, name) in names.iter().copied().enumerate() {
            if names[..i].contains(&name) {
                warn!(component = %name, index = i, "duplicate entry is unreachable by name");
                components.push(ComponentVerdict {
                    name: name.to_string(),
                    ok: true,
                    shadowed: true,
                    length: None,
                    digest: None,
                    error: None,
                });
                continue;
            }
            let mut digest = None;
            let mut observe = |phase: LoadPhase, snap: &LoadSnapshot<'_>| {
                if phase == LoadPhase::Authenticate {
                    digest = snap.digest.map(hex::encode);
                }
            };
            let verdict = match loader.load_component_with_callback(registry, container, name, None, &mut observe) {
                Ok(loaded) => ComponentVerdict {
                    name: name.to_string(),
                    ok: true,
                    shadowed: false,
                    length: Some(loaded.len()),
                    digest,
                    error: None,
                },
                Err(e) => {
                    warn!(component = %name, error = %e, "verification failed");
                    ComponentVerdict {
                        name: name.to_string(),
                        ok: false,
                        shadowed: false,
                        length: None,
                        digest: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            components.push(verdict);
        }
        Ok(VerifyReport { container: container.to_string(), components })
    })?;

    if json {
        print_json(&report)?;
    } else {
        for c in &report.components {
            match &c.error {
                None if c.shadowed => println!("[verify] {}/{} shadowed by an earlier entry", report.container, c.name),
                None => println!("[verify] {}/{} ok ({} bytes)", report.container, c.name, c.length.unwrap_or(0)),
                Some(e) => println!("[verify] {}/{} FAILED: {}", report.container, c.name, e),
            }
        }
    }

    let failed = report.components.iter().filter(|c| !c.ok).count();
    if failed > 0 {
        return Err(CliError::VerifyFailed { failed, total: report.components.len() });
    }
    info!(container = %report.container, components = report.components.len(), "verified");
    Ok(())
}

pub fn extract(image: &Path, component: &str, output: &Path, trust: &TrustArgs) -> Result<()> {
    let name = parse_signature(component)?;
    let bytes = read(image)?;
    let data = with_loader(&bytes, trust, |loader, registry, container| {
        Ok(loader.load_component(registry, container, name, None)?.into_vec())
    })?;
    write(output, &data)?;
    println!("[extract] {} -> {} ({} bytes)", name, output.display(), data.len());
    Ok(())
}

pub fn key_hash(key: &Path, alg: HashAlg, json: bool) -> Result<()> {
    let public = keys::load_public_key(key)?;
    let digest = keys::public_key_digest(&public, alg)?;
    let hex = hex::encode(digest.as_bytes());
    if json {
        print_json(&serde_json::json!({ "key": key.display().to_string(), "alg": format!("{alg:?}"), "digest": hex }))
    } else {
        println!("{hex}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_boot::builder::{ComponentSpec, ContainerBuilder};
    use container_boot::AuthType;

    #[test]
    fn report_lists_components_in_directory_order() {
        let image = ContainerBuilder::new(Signature::new(*b"BOOT"))
            .svn(2)
            .component(ComponentSpec::new(Signature::new(*b"SG1A"), vec![1u8; 64]).auth(AuthType::Sha256))
            .component(ComponentSpec::new(Signature::new(*b"CMD "), b"quiet".to_vec()).alignment(4))
            .build(None)
            .unwrap();
        let report = ContainerReport::from_image(&image).unwrap();
        assert_eq!(report.signature, "BOOT");
        assert_eq!(report.svn, 2);
        let names: Vec<_> = report.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["SG1A", "CMD "]);
        assert_eq!(report.components[0].auth_type, "Sha256");
        assert_eq!(report.components[0].hash.len(), 64);
        assert_eq!(report.components[1].offset % 16, 0);
    }

    #[test]
    fn report_rejects_garbage() {
        assert!(matches!(ContainerReport::from_image(&[0xFF; 64]), Err(CliError::Container(_))));
    }
}
