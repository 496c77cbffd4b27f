//! Tunnel-identifier allocation.

use sdn_types::Vni;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide tunnel-identifier allocator.
///
/// The counter is seeded from the largest identifier observed while
/// discovering existing overlays. Identifiers are unique for the lifetime
/// of the process; nothing is persisted beyond the network metadata the
/// counter is reconstructed from.
#[derive(Debug, Default)]
pub struct VniAllocator {
    last: AtomicU32,
}

impl VniAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an identifier already in use.
    pub fn observe(&self, vni: Vni) {
        self.last.fetch_max(vni.as_u32(), Ordering::SeqCst);
    }

    /// Returns a fresh identifier, strictly greater than every identifier
    /// allocated or observed so far.
    pub fn allocate(&self) -> Vni {
        Vni::new(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Largest identifier handed out or observed.
    pub fn last(&self) -> Vni {
        Vni::new(self.last.load(Ordering::SeqCst))
    }
}
