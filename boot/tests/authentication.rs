mod common;

use common::{default_trust, sig, signer, signer_for, trusting, BASE};
use container_boot::builder::{ComponentSpec, ContainerBuilder, ImageSigner};
use container_boot::layout::ContainerView;
use container_boot::{AuthType, ContainerError, ContainerRegistry, KeyHashStore, KeyUsage, Loader, MemoryWindow};

const PAYLOAD_LEN: usize = 0x400;

fn payload() -> Vec<u8> {
    (0..PAYLOAD_LEN).map(|i| (i as u8).wrapping_mul(31)).collect()
}

/// Container authenticated with `auth` at both levels.
fn build(auth: AuthType, signer: Option<&dyn ImageSigner>) -> Vec<u8> {
    ContainerBuilder::new(sig(b"AUTH"))
        .auth(auth)
        .component(ComponentSpec::new(sig(b"IMG0"), payload()).auth(auth).alignment(4))
        .component(ComponentSpec::new(sig(b"IMG1"), vec![0x42; 48]).auth(auth).alignment(4))
        .build(signer)
        .unwrap()
}

/// Register and load IMG0 from `image`.
fn load(image: &[u8], keys: &KeyHashStore) -> container_boot::Result<Vec<u8>> {
    let memory = MemoryWindow::new(BASE, image);
    let loader = Loader::new(&memory, keys);
    let mut registry = ContainerRegistry::with_capacity(2)?;
    loader.register_container(&mut registry, BASE, None)?;
    let loaded = loader.load_component(&mut registry, sig(b"AUTH"), sig(b"IMG0"), None)?;
    Ok(loaded.into_vec())
}

fn image_range(image: &[u8], name: &[u8; 4]) -> std::ops::Range<usize> {
    let view = ContainerView::parse(image).unwrap();
    let entry = view.find(sig(name)).unwrap();
    let start = view.data_offset() as usize + entry.offset() as usize;
    start..start + entry.size() as usize
}

#[test]
fn every_auth_type_accepts_a_pristine_container() {
    for auth in AuthType::ALL {
        let signer = signer_for(auth);
        let image = build(auth, Some(&signer));
        let keys = default_trust(&signer);
        assert_eq!(load(&image, &keys).unwrap(), payload(), "{auth:?}");
    }
}

#[test]
fn single_byte_corruption_flips_the_verdict() {
    for auth in AuthType::ALL {
        let signer = signer_for(auth);
        let pristine = build(auth, Some(&signer));
        let keys = default_trust(&signer);
        let range = image_range(&pristine, b"IMG0");

        // first, middle and last byte of the component range; for signed
        // types the last byte sits in the public key exponent
        for at in [range.start, range.start + PAYLOAD_LEN / 2, range.end - 1] {
            let mut image = pristine.clone();
            image[at] ^= 0x80;
            match auth {
                AuthType::None => assert!(load(&image, &keys).is_ok()),
                _ => {
                    let err = load(&image, &keys).unwrap_err();
                    assert!(err.is_security_violation(), "{auth:?} byte {at:#x}: {err:?}");
                }
            }
        }
    }
}

#[test]
fn signature_bytes_are_checked() {
    for auth in [AuthType::Rsa2048Pkcs1Sha256, AuthType::Rsa3072PssSha384] {
        let signer = signer_for(auth);
        let mut image = build(auth, Some(&signer));
        let keys = default_trust(&signer);
        let range = image_range(&image, b"IMG0");
        // SIGN header is 8 bytes; flip a byte inside the signature itself
        image[range.start + PAYLOAD_LEN + 8 + 17] ^= 0x01;
        assert_eq!(
            load(&image, &keys),
            Err(ContainerError::SecurityViolation("signature verification failed")),
            "{auth:?}"
        );
    }
}

#[test]
fn untrusted_key_is_refused_at_registration() {
    let auth = AuthType::Rsa2048PssSha256;
    let image = build(auth, Some(&signer(2048)));

    let nobody = KeyHashStore::new();
    assert_eq!(load(&image, &nobody), Err(ContainerError::SecurityViolation("untrusted public key")));

    // right key, wrong usage
    let os_only = trusting(&signer(2048), KeyUsage::OS);
    assert_eq!(load(&image, &os_only), Err(ContainerError::SecurityViolation("untrusted public key")));

    // a different key altogether
    let other = trusting(&signer(3072), KeyUsage::CONTAINER_DEFAULT);
    assert!(load(&image, &other).unwrap_err().is_security_violation());
}

#[test]
fn loader_key_usage_is_configurable() {
    let signer = signer(2048);
    let image = build(AuthType::Rsa2048Pkcs1Sha256, Some(&signer));
    let keys = trusting(&signer, KeyUsage::OS);

    let memory = MemoryWindow::new(BASE, &image);
    let loader = Loader::new(&memory, &keys).with_key_usage(KeyUsage::OS);
    let mut registry = ContainerRegistry::with_capacity(1).unwrap();
    loader.register_container(&mut registry, BASE, None).unwrap();
    let located = loader.locate_component(&mut registry, sig(b"AUTH"), sig(b"IMG1")).unwrap();
    // signed length excludes the trailing auth blob
    assert_eq!(located.length, 48);
    assert_eq!(located.data, &[0x42; 48][..]);
}

#[test]
fn mismatched_key_size_for_auth_type_is_rejected() {
    // a 3072-bit key cannot produce an RSA-2048 blob
    let b = ContainerBuilder::new(sig(b"AUTH"))
        .component(ComponentSpec::new(sig(b"IMG0"), payload()).auth(AuthType::Rsa2048Pkcs1Sha256));
    assert_eq!(b.build(Some(&signer(3072))), Err(ContainerError::InvalidParameter));
}

mod mono {
    use super::*;
    use container_boot::registry::ContainerTrust;

    fn build_mono(auth: AuthType, signer: &dyn ImageSigner) -> Vec<u8> {
        ContainerBuilder::new(sig(b"MONO"))
            .auth(auth)
            .mono_signing(true)
            .component(ComponentSpec::new(sig(b"AAAA"), vec![0xA1; 100]))
            // 4 KiB alignment leaves padding no component covers
            .component(ComponentSpec::new(sig(b"BBBB"), vec![0xB2; 100]).alignment(12))
            .build(Some(signer))
            .unwrap()
    }

    #[test]
    fn verdict_is_computed_once_and_cached() {
        let signer = signer(3072);
        let image = build_mono(AuthType::Rsa3072PssSha384, &signer);
        let keys = default_trust(&signer);
        let memory = MemoryWindow::new(BASE, &image);
        let loader = Loader::new(&memory, &keys);
        let mut registry = ContainerRegistry::with_capacity(1).unwrap();
        loader.register_container(&mut registry, BASE, None).unwrap();
        assert_eq!(registry.find(sig(b"MONO")).unwrap().trust(), ContainerTrust::Pending);

        let a = loader.load_component(&mut registry, sig(b"MONO"), sig(b"AAAA"), None).unwrap();
        assert_eq!(a.as_bytes(), &[0xA1; 100][..]);
        let entry = registry.find(sig(b"MONO")).unwrap();
        assert_eq!(entry.trust(), ContainerTrust::Verified);
        assert!(entry.digest().is_some());

        let b = loader.locate_component(&mut registry, sig(b"MONO"), sig(b"BBBB")).unwrap();
        assert_eq!(b.length, 100);
    }

    #[test]
    fn corruption_outside_any_component_is_caught() {
        for auth in [AuthType::Sha256, AuthType::Rsa2048Pkcs1Sha256] {
            let signer = signer_for(auth);
            let mut image = build_mono(auth, &signer);
            let keys = default_trust(&signer);

            let gap = ContainerView::parse(&image).unwrap().data_offset() as usize + 100 + 7;
            assert!(gap < image_range(&image, b"BBBB").start);
            image[gap] ^= 0x01;

            let memory = MemoryWindow::new(BASE, &image);
            let loader = Loader::new(&memory, &keys);
            let mut registry = ContainerRegistry::with_capacity(1).unwrap();
            loader.register_container(&mut registry, BASE, None).unwrap();

            let err = loader.load_component(&mut registry, sig(b"MONO"), sig(b"AAAA"), None).unwrap_err();
            assert!(err.is_security_violation(), "{auth:?}: {err:?}");
            // the rejection sticks for every other component
            assert_eq!(
                loader.load_component(&mut registry, sig(b"MONO"), sig(b"BBBB"), None).unwrap_err(),
                ContainerError::SecurityViolation("container previously rejected")
            );
            assert_eq!(registry.find(sig(b"MONO")).unwrap().trust(), ContainerTrust::Rejected);
        }
    }
}
