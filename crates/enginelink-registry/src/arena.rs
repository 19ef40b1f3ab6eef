//! Lifetime scopes.
//!
//! An [`Arena`] is one open scope of the registry. Borrowed handles wrapped
//! through it are valid until it closes; Owned handles adopted into it are
//! released when it closes unless promoted out first. Scratch memory for C
//! strings passed to native calls comes from its bump allocator.

use std::ffi::CStr;
use std::fmt;
use std::panic::Location;

use bumpalo::Bump;
use enginelink_core::{Handle, Ownership, RawWords, ScopeId, TypeTag};

use crate::registry::HandleRegistry;

/// A bulk-release scope for transient handles.
pub struct Arena<'r> {
    registry: &'r HandleRegistry,
    scope: ScopeId,
    bump: Bump,
    open: bool,
}

impl<'r> Arena<'r> {
    pub(crate) fn new(registry: &'r HandleRegistry, scope: ScopeId) -> Self {
        Self {
            registry,
            scope,
            bump: Bump::new(),
            open: true,
        }
    }

    #[inline]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn registry(&self) -> &'r HandleRegistry {
        self.registry
    }

    /// Wraps raw words as a handle borrowed for the life of this scope.
    #[track_caller]
    pub fn wrap(&self, raw: RawWords, tag: TypeTag) -> Handle {
        self.registry.wrap(raw, tag, Ownership::Borrowed(self.scope))
    }

    pub fn borrow(&self, handle: &Handle) -> RawWords {
        self.registry.borrow(handle)
    }

    /// Takes ownership of a value the native runtime just created; it is
    /// destroyed when the scope closes.
    #[track_caller]
    pub fn adopt(&self, raw: RawWords, tag: TypeTag) -> Handle {
        let site = Location::caller();
        match self.registry.adopt(self.scope, raw, tag, site) {
            Ok(handle) => handle,
            Err(defect) => {
                self.registry.config().on_defect.report(&defect);
                // The scope is gone; the caller keeps sole ownership.
                self.registry.wrap(raw, tag, Ownership::Owned)
            }
        }
    }

    /// Moves an Owned or shared handle out of the scope so it survives the
    /// close.
    #[track_caller]
    pub fn promote(&self, handle: Handle) -> Handle {
        self.registry.transfer(handle)
    }

    /// Copies `text` into scope memory as a NUL-terminated C string. Text
    /// after an interior NUL is dropped.
    pub fn alloc_cstr(&self, text: &str) -> &CStr {
        let bytes = text.as_bytes();
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        let buf = self.bump.alloc_slice_fill_copy(len + 1, 0u8);
        buf[..len].copy_from_slice(&bytes[..len]);
        CStr::from_bytes_until_nul(buf).unwrap_or_default()
    }

    /// Closes the scope: adopted handles are released and borrowed ones
    /// expire. Returns the number of native releases. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> usize {
        if !self.open {
            log::trace!("{} already closed", self.scope);
            return 0;
        }
        self.open = false;
        let released = self.registry.close_scope(self.scope);
        self.bump.reset();
        released
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("scope", &self.scope)
            .field("open", &self.open)
            .field("scratch_bytes", &self.bump.allocated_bytes())
            .finish()
    }
}
