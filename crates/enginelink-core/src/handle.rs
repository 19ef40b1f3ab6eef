//! Handles to native resources.
//!
//! A [`Handle`] is what host code holds in place of a native pointer. It
//! records the raw words the native runtime handed out, the [`TypeTag`] that
//! selects the native destructor, the ownership class it was created with and
//! the registry slot ([`HandleId`]) that tracks its lifetime.
//!
//! Handles are plain values. Copying one does not retain anything; the
//! registry decides what a copy may do.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::panic::Location;

use crate::ownership::OwnershipKind;
use crate::tag::TypeTag;

/// Maximum width of a handle, in machine words.
pub const MAX_HANDLE_WORDS: usize = 3;

/// Raw native words of a handle (1 to 3 machine words).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawWords {
    words: [usize; MAX_HANDLE_WORDS],
    len: u8,
}

impl RawWords {
    /// A single-word handle (object pointer, string, RID).
    #[inline]
    pub const fn one(word: usize) -> Self {
        Self {
            words: [word, 0, 0],
            len: 1,
        }
    }

    /// A two-word handle (callable, signal, packed array).
    #[inline]
    pub const fn two(a: usize, b: usize) -> Self {
        Self {
            words: [a, b, 0],
            len: 2,
        }
    }

    /// A three-word handle.
    #[inline]
    pub const fn three(a: usize, b: usize, c: usize) -> Self {
        Self {
            words: [a, b, c],
            len: 3,
        }
    }

    /// All-zero words of the given width.
    #[inline]
    pub const fn null(width: u8) -> Self {
        Self {
            words: [0; MAX_HANDLE_WORDS],
            len: width,
        }
    }

    /// Returns `None` if `words` is empty or wider than [`MAX_HANDLE_WORDS`].
    pub fn from_slice(words: &[usize]) -> Option<Self> {
        if words.is_empty() || words.len() > MAX_HANDLE_WORDS {
            return None;
        }
        let mut raw = Self::null(words.len() as u8);
        raw.words[..words.len()].copy_from_slice(words);
        Some(raw)
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.words[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First word, which is the object pointer for single-word handles.
    #[inline]
    pub const fn first(&self) -> usize {
        self.words[0]
    }

    /// True if every word is zero (a null object, an empty callable).
    pub fn is_null(&self) -> bool {
        self.as_slice().iter().all(|w| *w == 0)
    }
}

impl fmt::Debug for RawWords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, word) in self.as_slice().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{word:#x}")?;
        }
        f.write_str("]")
    }
}

/// Registry slot of a handle: slot index plus the generation the slot had
/// when the handle was issued.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    pub index: u32,
    pub generation: u32,
}

impl HandleId {
    /// Placeholder for diagnostics about handles that were never issued.
    pub const NONE: HandleId = HandleId::new(u32::MAX, u32::MAX);

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier of a lifetime scope (arena).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope {}", self.0)
    }
}

/// Identity of a host-side wrapper object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct WrapperId(pub NonZeroU64);

/// A tracked native handle.
///
/// Equality and hashing look only at the raw words: two handles over the same
/// native resource compare equal even if they were registered separately.
#[derive(Clone, Copy)]
pub struct Handle {
    id: HandleId,
    tag: TypeTag,
    kind: OwnershipKind,
    raw: RawWords,
    site: &'static Location<'static>,
}

impl Handle {
    /// Builds a handle value. Only the registry should call this; a handle
    /// that was not issued by a registry fails every registry operation.
    #[inline]
    pub const fn new(
        id: HandleId,
        tag: TypeTag,
        kind: OwnershipKind,
        raw: RawWords,
        site: &'static Location<'static>,
    ) -> Self {
        Self {
            id,
            tag,
            kind,
            raw,
            site,
        }
    }

    #[inline]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    #[inline]
    pub const fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Ownership class this handle was issued with.
    #[inline]
    pub const fn kind(&self) -> OwnershipKind {
        self.kind
    }

    /// Raw words as issued. Reading them does not check liveness; pass
    /// handles to native code through the registry's `borrow` instead.
    #[inline]
    pub const fn raw(&self) -> &RawWords {
        &self.raw
    }

    /// Where the handle was wrapped or acquired.
    #[inline]
    pub const fn site(&self) -> &'static Location<'static> {
        self.site
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .finish()
    }
}
