//! loader.rs - Loader facade: locate -> copy -> authenticate -> decompress
//!
//! `Loader` holds the platform collaborators (backing memory, key store,
//! optional flash map, codec) and the policy knobs (key usage, SVN floor,
//! boot partition). The registry is passed in per call so the platform owns
//! its lifetime and can hand it to the next stage.
//!
//! Every load runs a one-shot request:
//!   Start -> Located -> Copied -> Authenticated -> [Decompressed] -> Done
//!   any state -> Failed(reason)
//! States only move forward. Bytes are never decompressed before they are
//! authenticated, and nothing is returned once authentication fails.

use alloc::vec::Vec;
use core::fmt;

use log::{debug, info, warn};

use crate::auth::{Authenticator, AuthType, Digest, Verdict};
use crate::decompress::{self, BuiltinCodec, Decoded, Decompressor, Output};
use crate::error::{ContainerError, Result};
use crate::flash_map::{BootPartition, FlashMap};
use crate::keys::{KeyStore, KeyUsage};
use crate::layout::{ComponentEntry, ContainerHeader, ContainerView, Signature, CONTAINER_HEADER_SIZE};
use crate::locator::{self, Components, Resolution};
use crate::memory::BackingStore;
use crate::progress::{notify, ComponentKind, LoadObserver, LoadPhase, LoadSnapshot};
use crate::registry::{ContainerEntry, ContainerRegistry, ContainerTrust};

static BUILTIN_CODEC: BuiltinCodec = BuiltinCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadState {
    Start,
    Located,
    Copied,
    Authenticated,
    Decompressed,
    Done,
    Failed(ContainerError),
}

impl LoadState {
    fn rank(self) -> u8 {
        match self {
            LoadState::Start => 0,
            LoadState::Located => 1,
            LoadState::Copied => 2,
            LoadState::Authenticated => 3,
            LoadState::Decompressed => 4,
            LoadState::Done => 5,
            LoadState::Failed(_) => 6,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, LoadState::Done | LoadState::Failed(_))
    }
}

pub(crate) struct LoadRequest {
    container: Signature,
    component: Signature,
    state: LoadState,
}

impl LoadRequest {
    fn new(container: Signature, component: Signature) -> Self {
        Self { container, component, state: LoadState::Start }
    }

    fn advance(&mut self, next: LoadState) -> Result<()> {
        if self.state.is_terminal() || matches!(next, LoadState::Failed(_)) || next.rank() <= self.state.rank() {
            return Err(ContainerError::InvalidParameter);
        }
        debug!(target: "loader", "{}/{}: {:?} -> {:?}", self.container, self.component, self.state, next);
        self.state = next;
        Ok(())
    }

    fn conclude<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_security_violation() {
                warn!(target: "loader", "{}/{} rejected in {:?}: {}", self.container, self.component, self.state, e);
            } else {
                debug!(target: "loader", "{}/{} failed in {:?}: {}", self.container, self.component, self.state, e);
            }
            self.state = LoadState::Failed(*e);
        }
        result
    }
}

/// How a resolved target is authenticated.
#[derive(Debug, Clone, Copy)]
enum TargetAuth {
    /// Flash regions and components with auth type none.
    Unauthenticated,
    /// One verdict for the whole container, cached in the registry.
    Mono,
    Component { auth_type: AuthType, expected: Option<Digest> },
}

/// Owned summary of a resolution so the registry can be borrowed mutably
/// afterwards (mono verdict caching).
#[derive(Debug, Clone, Copy)]
struct Target {
    kind: ComponentKind,
    address: u64,
    size: usize,
    /// Bytes before the trailing signature blob.
    image_len: usize,
    compressed: bool,
    auth: TargetAuth,
}

impl Target {
    fn from_resolution(resolution: &Resolution<'_>) -> Result<Self> {
        match resolution {
            Resolution::FlashRegion(region) => Ok(Self {
                kind: ComponentKind::FlashRegion,
                address: region.base,
                size: region.size as usize,
                image_len: region.size as usize,
                compressed: false,
                auth: TargetAuth::Unauthenticated,
            }),
            Resolution::Component(hit) => {
                let component = &hit.component;
                let size = component.size() as usize;
                let (auth, image_len) = if hit.container.view()?.is_mono_signed() {
                    (TargetAuth::Mono, size)
                } else {
                    let auth_type = component.auth_type()?;
                    let expected = match auth_type.hash_alg() {
                        Some(alg) => Some(
                            Digest::from_slice(alg, component.hash_data())
                                .ok_or(ContainerError::SecurityViolation("hash data width"))?,
                        ),
                        None => None,
                    };
                    let image_len = size
                        .checked_sub(auth_type.signed_blob_len())
                        .ok_or(ContainerError::SecurityViolation("component shorter than its signature"))?;
                    (TargetAuth::Component { auth_type, expected }, image_len)
                };
                Ok(Self {
                    kind: ComponentKind::Component,
                    address: hit.address,
                    size,
                    image_len,
                    compressed: component.is_compressed(),
                    auth,
                })
            }
        }
    }
}

/// Result of `locate_component`: bytes in place, already authenticated.
#[derive(Debug, Clone, Copy)]
pub struct LocatedImage<'p> {
    /// Image bytes in backing memory (signature blob excluded).
    pub data: &'p [u8],
    /// Decompressed size for compressed components, else `data.len()`.
    pub length: usize,
    pub compressed: bool,
    pub address: u64,
}

enum Storage<'b> {
    Caller(&'b mut [u8]),
    Owned(Vec<u8>),
}

impl Storage<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Caller(buf) => buf,
            Storage::Owned(v) => v,
        }
    }
}

/// Authenticated (and decompressed) component bytes.
pub struct LoadedComponent<'b> {
    storage: Storage<'b>,
    length: usize,
}

impl<'b> LoadedComponent<'b> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True if the bytes live in the buffer the caller passed in.
    pub fn is_caller_buffer(&self) -> bool {
        matches!(self.storage, Storage::Caller(_))
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self.storage {
            Storage::Owned(mut v) => {
                v.truncate(self.length);
                v
            }
            Storage::Caller(buf) => buf[..self.length].to_vec(),
        }
    }
}

impl fmt::Debug for LoadedComponent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedComponent")
            .field("length", &self.length)
            .field("caller_buffer", &self.is_caller_buffer())
            .finish()
    }
}

fn copy_to_vec(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(bytes.len()).map_err(|_| ContainerError::OutOfResources)?;
    v.extend_from_slice(bytes);
    Ok(v)
}

pub struct Loader<'p> {
    memory: &'p dyn BackingStore,
    keys: &'p dyn KeyStore,
    flash_map: Option<&'p dyn FlashMap>,
    codec: &'p dyn Decompressor,
    key_usage: KeyUsage,
    min_svn: u8,
    partition: BootPartition,
}

impl<'p> Loader<'p> {
    pub fn new(memory: &'p dyn BackingStore, keys: &'p dyn KeyStore) -> Self {
        Self {
            memory,
            keys,
            flash_map: None,
            codec: &BUILTIN_CODEC,
            key_usage: KeyUsage::CONTAINER_DEFAULT,
            min_svn: 0,
            partition: BootPartition::Primary,
        }
    }

    pub fn with_flash_map(mut self, flash_map: &'p dyn FlashMap) -> Self {
        self.flash_map = Some(flash_map);
        self
    }

    pub fn with_codec(mut self, codec: &'p dyn Decompressor) -> Self {
        self.codec = codec;
        self
    }

    /// Usage bits a signing key must carry in the key store.
    pub fn with_key_usage(mut self, usage: KeyUsage) -> Self {
        self.key_usage = usage;
        self
    }

    /// Containers with a lower SVN are refused at registration.
    pub fn with_min_svn(mut self, svn: u8) -> Self {
        self.min_svn = svn;
        self
    }

    pub fn with_boot_partition(mut self, partition: BootPartition) -> Self {
        self.partition = partition;
        self
    }

    fn authenticator(&self) -> Authenticator<'p> {
        Authenticator::new(self.keys, self.key_usage)
    }

    fn map(&self, address: u64, len: usize) -> Option<&'p [u8]> {
        let memory: &'p dyn BackingStore = self.memory;
        memory.map(address, len)
    }

    /// Read, validate and cache the header at `base`, then authenticate it
    /// (unless the container is mono-signed, which is checked on first use).
    pub fn register_container(
        &self,
        registry: &mut ContainerRegistry,
        base: u64,
        mut observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Signature> {
        if !registry.is_ready() {
            return Err(ContainerError::NotReady);
        }
        let fixed = self.map(base, CONTAINER_HEADER_SIZE).ok_or(ContainerError::InvalidParameter)?;
        let header = ContainerHeader::peek(fixed)?;
        let signature = header.signature();
        let media = self
            .map(base, header.total_len())
            .ok_or(ContainerError::VolumeCorrupted("container overruns backing memory"))?;
        let on_media = ContainerView::parse(media).map_err(|e| {
            warn!(target: "registry", "rejecting container at {:#x}: {}", base, e);
            e
        })?;
        if on_media.svn() < self.min_svn {
            warn!(target: "registry", "{} svn {} below floor {}", signature, on_media.svn(), self.min_svn);
            return Err(ContainerError::SecurityViolation("svn below rollback floor"));
        }
        registry.check_room(signature)?;

        // everything from here on reads the private copy; the view is
        // scoped so `cache` can move into the registry
        let cache = copy_to_vec(on_media.region())?;
        let (trust, digest, count) = {
            let view = ContainerView::parse(&cache)?;
            let snapshot = LoadSnapshot {
                kind: ComponentKind::ContainerHeader,
                container: signature,
                component: Signature::NONE,
                data: &cache,
                hash_alg: view.auth_type().hash_alg(),
                digest: None,
            };
            notify(&mut observer, LoadPhase::Locate, snapshot);

            if view.is_mono_signed() {
                (ContainerTrust::Pending, None, view.count())
            } else {
                let verdict = self.verify_container(&view, None)?;
                let digest = verdict.digest;
                notify(
                    &mut observer,
                    LoadPhase::Authenticate,
                    LoadSnapshot { digest: digest.as_ref().map(Digest::as_bytes), ..snapshot },
                );
                (ContainerTrust::Verified, digest, view.count())
            }
        };

        registry.insert(ContainerEntry::new(signature, base, cache, trust, digest))?;
        info!(target: "registry", "registered {} @ {:#x} ({} components, {:?})", signature, base, count, trust);
        Ok(signature)
    }

    pub fn unregister_container(&self, registry: &mut ContainerRegistry, signature: Signature) -> Result<()> {
        registry.unregister_container(signature)
    }

    /// Directory entry of a registered container, or the flash region the
    /// container signature names.
    pub fn locate_component_entry<'r>(
        &self,
        registry: &'r ContainerRegistry,
        container: Signature,
        component: Signature,
    ) -> Result<Resolution<'r>> {
        locator::resolve(registry, self.flash_map, self.partition, container, component)
    }

    /// Directory lookup in a container that has not been registered.
    /// Nothing is authenticated.
    pub fn locate_component_entry_from_container(&self, base: u64, component: Signature) -> Result<ComponentEntry<'p>> {
        let fixed = self.map(base, CONTAINER_HEADER_SIZE).ok_or(ContainerError::InvalidParameter)?;
        let header = ContainerHeader::peek(fixed)?;
        let media = self
            .map(base, header.total_len())
            .ok_or(ContainerError::VolumeCorrupted("container overruns backing memory"))?;
        let view = ContainerView::parse(media)?;
        locator::locate_in_view(&view, component)
    }

    pub fn next_available_component(
        &self,
        registry: &ContainerRegistry,
        container: Signature,
        cursor: Option<&mut Signature>,
    ) -> Result<()> {
        locator::next_component(registry, container, cursor)
    }

    pub fn components<'r>(&self, registry: &'r ContainerRegistry, container: Signature) -> Result<Components<'r>> {
        Components::new(registry, container)
    }

    /// Authenticate in place; no copy. The returned slice points into
    /// backing memory.
    pub fn locate_component(
        &self,
        registry: &mut ContainerRegistry,
        container: Signature,
        component: Signature,
    ) -> Result<LocatedImage<'p>> {
        let mut request = LoadRequest::new(container, component);
        let result = self.locate_inner(&mut request, registry);
        request.conclude(result)
    }

    fn locate_inner(&self, request: &mut LoadRequest, registry: &mut ContainerRegistry) -> Result<LocatedImage<'p>> {
        let target = self.resolve_target(registry, request.container, request.component)?;
        let raw = self.map_target(&target)?;
        request.advance(LoadState::Located)?;

        let (image, blob) = raw.split_at(target.image_len);
        self.authenticate_target(registry, request.container, &target, image, blob)?;
        request.advance(LoadState::Authenticated)?;

        let length = if target.compressed { self.codec.info(image)?.destination_size } else { image.len() };
        request.advance(LoadState::Done)?;
        Ok(LocatedImage { data: image, length, compressed: target.compressed, address: target.address })
    }

    /// Copy, authenticate and decompress a component. With `buffer` the
    /// result lands there (BufferTooSmall reports the size needed);
    /// otherwise it is allocated.
    pub fn load_component<'b>(
        &self,
        registry: &mut ContainerRegistry,
        container: Signature,
        component: Signature,
        buffer: Option<&'b mut [u8]>,
    ) -> Result<LoadedComponent<'b>> {
        let mut request = LoadRequest::new(container, component);
        let result = self.load_inner(&mut request, registry, buffer, &mut None);
        request.conclude(result)
    }

    /// `load_component`, reporting each finished phase to `observer`.
    pub fn load_component_with_callback<'b>(
        &self,
        registry: &mut ContainerRegistry,
        container: Signature,
        component: Signature,
        buffer: Option<&'b mut [u8]>,
        observer: &mut dyn LoadObserver,
    ) -> Result<LoadedComponent<'b>> {
        let mut request = LoadRequest::new(container, component);
        let result = self.load_inner(&mut request, registry, buffer, &mut Some(observer));
        request.conclude(result)
    }

    fn load_inner<'b>(
        &self,
        request: &mut LoadRequest,
        registry: &mut ContainerRegistry,
        mut buffer: Option<&'b mut [u8]>,
        observer: &mut Option<&mut dyn LoadObserver>,
    ) -> Result<LoadedComponent<'b>> {
        let (container, component) = (request.container, request.component);
        let target = self.resolve_target(registry, container, component)?;
        let raw = self.map_target(&target)?;
        request.advance(LoadState::Located)?;
        let snapshot = LoadSnapshot { kind: target.kind, container, component, data: raw, hash_alg: None, digest: None };
        notify(observer, LoadPhase::Locate, snapshot);

        let (image, blob) = raw.split_at(target.image_len);
        // compressed payloads are staged so the caller's buffer only ever
        // receives decoded bytes
        let staged = match buffer.take() {
            Some(buf) if !target.compressed => {
                let dst = buf
                    .get_mut(..image.len())
                    .ok_or(ContainerError::BufferTooSmall { required: image.len() })?;
                dst.copy_from_slice(image);
                Storage::Caller(buf)
            }
            other => {
                buffer = other;
                Storage::Owned(copy_to_vec(image)?)
            }
        };
        let copy = &staged.bytes()[..image.len()];
        request.advance(LoadState::Copied)?;
        notify(observer, LoadPhase::Copy, LoadSnapshot { data: copy, ..snapshot });

        let verdict = self.authenticate_target(registry, container, &target, copy, blob)?;
        request.advance(LoadState::Authenticated)?;
        let digest = verdict.digest.as_ref().map(Digest::as_bytes);
        let hash_alg = verdict.digest.map(|d| d.alg());
        notify(observer, LoadPhase::Authenticate, LoadSnapshot { data: copy, hash_alg, digest, ..snapshot });

        let loaded = if target.compressed {
            let output = match buffer {
                Some(buf) => Output::Caller(buf),
                None => Output::Allocate,
            };
            let loaded = match decompress::decompress_into(self.codec, staged.bytes(), output)? {
                Decoded::Caller(buf, length) => LoadedComponent { storage: Storage::Caller(buf), length },
                Decoded::Owned(v) => LoadedComponent { length: v.len(), storage: Storage::Owned(v) },
            };
            request.advance(LoadState::Decompressed)?;
            notify(
                observer,
                LoadPhase::Decompress,
                LoadSnapshot { data: loaded.as_bytes(), hash_alg, digest, ..snapshot },
            );
            loaded
        } else {
            let length = image.len();
            LoadedComponent { storage: staged, length }
        };

        request.advance(LoadState::Done)?;
        info!(target: "loader", "loaded {}/{} ({} bytes)", container, component, loaded.len());
        Ok(loaded)
    }

    fn resolve_target(&self, registry: &ContainerRegistry, container: Signature, component: Signature) -> Result<Target> {
        let resolution = locator::resolve(registry, self.flash_map, self.partition, container, component)?;
        Target::from_resolution(&resolution)
    }

    fn map_target(&self, target: &Target) -> Result<&'p [u8]> {
        self.map(target.address, target.size)
            .ok_or(ContainerError::VolumeCorrupted("component outside backing memory"))
    }

    fn authenticate_target(
        &self,
        registry: &mut ContainerRegistry,
        container: Signature,
        target: &Target,
        image: &[u8],
        blob: &[u8],
    ) -> Result<Verdict> {
        match target.auth {
            TargetAuth::Unauthenticated => Ok(Verdict::UNAUTHENTICATED),
            TargetAuth::Component { auth_type, expected } => {
                self.authenticator()
                    .authenticate(auth_type, &[image], expected.as_ref().map(Digest::as_bytes), blob)
            }
            TargetAuth::Mono => self.authenticate_mono(registry.find_mut(container)?),
        }
    }

    /// Whole-container verdict, computed once and cached in the entry.
    fn authenticate_mono(&self, entry: &mut ContainerEntry) -> Result<Verdict> {
        match entry.trust() {
            ContainerTrust::Verified => {
                let auth_type = entry.view()?.auth_type();
                return Ok(Verdict { auth_type, digest: entry.digest() });
            }
            ContainerTrust::Rejected => return Err(ContainerError::SecurityViolation("container previously rejected")),
            ContainerTrust::Pending => {}
        }

        let outcome = {
            let view = entry.view()?;
            let data = self
                .map(entry.data_base()?, view.data_size() as usize)
                .ok_or(ContainerError::VolumeCorrupted("container data outside backing memory"))?;
            self.verify_container(&view, Some(data))
        };
        match outcome {
            Ok(verdict) => {
                entry.settle(ContainerTrust::Verified, verdict.digest);
                info!(target: "auth", "{} mono signature accepted", entry.signature());
                Ok(verdict)
            }
            Err(e) if e.is_security_violation() => {
                entry.settle(ContainerTrust::Rejected, None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Container-level auth over header+directory, plus the data region
    /// for mono-signed containers.
    fn verify_container(&self, view: &ContainerView<'_>, data: Option<&[u8]>) -> Result<Verdict> {
        let auth_type = view.auth_type();
        let auth_data = view.auth_data();
        let expected = (!auth_type.is_signed()).then_some(auth_data);
        let directory = view.directory_bytes();
        match data {
            Some(data) => self.authenticator().authenticate(auth_type, &[directory, data], expected, auth_data),
            None => self.authenticator().authenticate(auth_type, &[directory], expected, auth_data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ComponentSpec, Compression, ContainerBuilder};
    use crate::keys::KeyHashStore;
    use crate::memory::MemoryWindow;
    use alloc::vec;
    use std::vec::Vec;

    const BASE: u64 = 0x7000_0000;

    fn sig(tag: &[u8; 4]) -> Signature {
        Signature::new(*tag)
    }

    fn boot_image() -> Vec<u8> {
        ContainerBuilder::new(sig(b"BOOT"))
            .auth(AuthType::Sha256)
            .component(ComponentSpec::new(sig(b"SG1A"), vec![0x5A; 0x1000]).auth(AuthType::Sha256))
            .component(
                ComponentSpec::new(sig(b"SG1B"), vec![0x11; 0x800])
                    .auth(AuthType::Sha384)
                    .compression(Compression::Zlib),
            )
            .component(ComponentSpec::new(sig(b"DBUG"), vec![0xEE; 64]))
            .build(None)
            .unwrap()
    }

    #[test]
    fn state_machine_only_moves_forward() {
        let mut r = LoadRequest::new(sig(b"BOOT"), sig(b"SG1A"));
        r.advance(LoadState::Located).unwrap();
        assert_eq!(r.advance(LoadState::Start), Err(ContainerError::InvalidParameter));
        assert_eq!(r.advance(LoadState::Located), Err(ContainerError::InvalidParameter));
        r.advance(LoadState::Authenticated).unwrap();
        let failed: Result<()> = r.conclude(Err(ContainerError::NotFound));
        assert!(failed.is_err());
        assert_eq!(r.state, LoadState::Failed(ContainerError::NotFound));
        assert_eq!(r.advance(LoadState::Done), Err(ContainerError::InvalidParameter));
    }

    #[test]
    fn register_locate_load() {
        let image = boot_image();
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();

        assert_eq!(loader.register_container(&mut registry, BASE, None).unwrap(), sig(b"BOOT"));

        let located = loader.locate_component(&mut registry, sig(b"BOOT"), sig(b"SG1A")).unwrap();
        assert_eq!(located.length, 0x1000);
        assert!(located.data.iter().all(|b| *b == 0x5A));

        let loaded = loader.load_component(&mut registry, sig(b"BOOT"), sig(b"SG1B"), None).unwrap();
        assert_eq!(loaded.as_bytes(), &[0x11; 0x800][..]);

        // compressed: locate reports the decoded size
        let located = loader.locate_component(&mut registry, sig(b"BOOT"), sig(b"SG1B")).unwrap();
        assert!(located.compressed);
        assert_eq!(located.length, 0x800);

        assert_eq!(
            loader.load_component(&mut registry, sig(b"BOOT"), sig(b"NONE"), None).unwrap_err(),
            ContainerError::NotFound
        );
    }

    #[test]
    fn caller_buffer_too_small_reports_exact_size() {
        let image = boot_image();
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        loader.register_container(&mut registry, BASE, None).unwrap();

        let mut small = vec![0u8; 0x0FFF];
        assert_eq!(
            loader.load_component(&mut registry, sig(b"BOOT"), sig(b"SG1A"), Some(&mut small)).unwrap_err(),
            ContainerError::BufferTooSmall { required: 0x1000 }
        );
        let mut small = vec![0u8; 0x7FF];
        assert_eq!(
            loader.load_component(&mut registry, sig(b"BOOT"), sig(b"SG1B"), Some(&mut small)).unwrap_err(),
            ContainerError::BufferTooSmall { required: 0x800 }
        );

        let mut exact = vec![0u8; 0x1000];
        let loaded = loader.load_component(&mut registry, sig(b"BOOT"), sig(b"SG1A"), Some(&mut exact)).unwrap();
        assert!(loaded.is_caller_buffer());
        assert_eq!(loaded.len(), 0x1000);
    }

    #[test]
    fn observer_sees_every_phase_in_order() {
        let image = boot_image();
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        loader.register_container(&mut registry, BASE, None).unwrap();

        let mut phases = Vec::new();
        let mut record = |phase: LoadPhase, snap: &LoadSnapshot<'_>| {
            phases.push((phase, snap.data.len(), snap.digest.map(|d| d.len())));
        };
        loader
            .load_component_with_callback(&mut registry, sig(b"BOOT"), sig(b"SG1B"), None, &mut record)
            .unwrap();
        assert_eq!(phases.len(), 4);
        assert_eq!(phases[0].0, LoadPhase::Locate);
        assert_eq!(phases[1].0, LoadPhase::Copy);
        assert_eq!(phases[2], (LoadPhase::Authenticate, phases[1].1, Some(48)));
        assert_eq!(phases[3], (LoadPhase::Decompress, 0x800, Some(48)));
    }

    #[test]
    fn corrupted_component_is_rejected_and_nothing_returned() {
        let mut image = boot_image();
        let at = {
            let view = ContainerView::parse(&image).unwrap();
            view.data_offset() as usize + view.find(sig(b"SG1A")).unwrap().offset() as usize + 7
        };
        image[at] ^= 0x01;

        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        loader.register_container(&mut registry, BASE, None).unwrap();
        assert!(loader.load_component(&mut registry, sig(b"BOOT"), sig(b"SG1A"), None).unwrap_err().is_security_violation());
        assert!(loader.locate_component(&mut registry, sig(b"BOOT"), sig(b"SG1A")).unwrap_err().is_security_violation());
        // sibling components still load
        assert!(loader.load_component(&mut registry, sig(b"BOOT"), sig(b"DBUG"), None).is_ok());
    }

    #[test]
    fn tampered_directory_fails_registration() {
        let mut image = boot_image();
        // first entry's size field
        image[16 + 8] ^= 0x01;
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        assert!(loader.register_container(&mut registry, BASE, None).unwrap_err().is_security_violation());
        assert!(registry.is_empty());
    }

    #[test]
    fn svn_floor_and_unmapped_base() {
        let image = boot_image();
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        let strict = Loader::new(&memory, &keys).with_min_svn(1);
        assert_eq!(
            strict.register_container(&mut registry, BASE, None),
            Err(ContainerError::SecurityViolation("svn below rollback floor"))
        );
        let loader = Loader::new(&memory, &keys);
        assert_eq!(loader.register_container(&mut registry, 0x10, None), Err(ContainerError::InvalidParameter));
        assert_eq!(
            loader.register_container(&mut ContainerRegistry::unallocated(), BASE, None),
            Err(ContainerError::NotReady)
        );
    }

    #[test]
    fn unregistered_lookup_reads_media_directly() {
        let image = boot_image();
        let memory = MemoryWindow::new(BASE, &image);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        let entry = loader.locate_component_entry_from_container(BASE, sig(b"DBUG")).unwrap();
        assert_eq!(entry.size(), 64);
        assert_eq!(loader.locate_component_entry_from_container(BASE, sig(b"XXXX")).unwrap_err(), ContainerError::NotFound);
    }

    #[test]
    fn unregistered_lookup_refuses_a_truncated_container() {
        let image = boot_image();
        let short = &image[..image.len() - 1];
        let memory = MemoryWindow::new(BASE, short);
        let keys = KeyHashStore::new();
        let loader = Loader::new(&memory, &keys);
        // the directory is intact, the data region is one byte short
        assert!(matches!(
            loader.locate_component_entry_from_container(BASE, sig(b"DBUG")),
            Err(ContainerError::VolumeCorrupted(_))
        ));
        let mut registry = ContainerRegistry::with_capacity(4).unwrap();
        assert!(matches!(
            loader.register_container(&mut registry, BASE, None),
            Err(ContainerError::VolumeCorrupted(_))
        ));
    }
}
