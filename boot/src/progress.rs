//! progress.rs - Per-phase load notifications
//!
//! Measured-boot and progress-bar consumers hook in here. The observer is
//! called synchronously at each phase boundary and never stored.

use crate::auth::HashAlg;
use crate::layout::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Locate,
    Copy,
    Authenticate,
    Decompress,
}

/// What the snapshot's bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    ContainerHeader,
    Component,
    FlashRegion,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadSnapshot<'a> {
    pub kind: ComponentKind,
    pub container: Signature,
    pub component: Signature,
    /// Bytes as they stand after the phase.
    pub data: &'a [u8],
    pub hash_alg: Option<HashAlg>,
    /// Set from `Authenticate` on for authenticated loads.
    pub digest: Option<&'a [u8]>,
}

pub trait LoadObserver {
    fn on_phase(&mut self, phase: LoadPhase, snapshot: &LoadSnapshot<'_>);
}

impl<F> LoadObserver for F
where
    F: FnMut(LoadPhase, &LoadSnapshot<'_>),
{
    fn on_phase(&mut self, phase: LoadPhase, snapshot: &LoadSnapshot<'_>) {
        self(phase, snapshot)
    }
}

pub(crate) fn notify(observer: &mut Option<&mut dyn LoadObserver>, phase: LoadPhase, snapshot: LoadSnapshot<'_>) {
    if let Some(observer) = observer.as_mut() {
        observer.on_phase(phase, &snapshot);
    }
}
