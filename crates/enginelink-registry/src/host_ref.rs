//! Host-side wrapper references.

use std::fmt;
use std::sync::Arc;

use enginelink_core::{Handle, OwnershipDefect, WrapperId};

use crate::registry::HandleRegistry;

/// The host wrapper object around a native handle.
///
/// Dropping a `HostRef` is the host's garbage collector finalizing the
/// wrapper: the registry releases a still-live Owned or shared handle
/// exactly once. The drop may happen on any thread.
pub struct HostRef {
    registry: Arc<HandleRegistry>,
    handle: Handle,
    id: WrapperId,
}

impl HostRef {
    pub(crate) fn new(registry: Arc<HandleRegistry>, handle: Handle, id: WrapperId) -> Self {
        Self {
            registry,
            handle,
            id,
        }
    }

    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    #[inline]
    pub fn id(&self) -> WrapperId {
        self.id
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Releases the handle now instead of at finalization.
    pub fn release(&self) {
        self.registry.release(self.handle);
    }

    pub fn try_release(&self) -> Result<(), OwnershipDefect> {
        self.registry.try_release(self.handle)
    }

    /// Records that the native object references this wrapper back.
    pub fn mark_cycle(&self) {
        self.registry.mark_cycle(&self.handle, self.id);
    }
}

impl Drop for HostRef {
    fn drop(&mut self) {
        self.registry.finalize(self.handle);
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .finish()
    }
}
