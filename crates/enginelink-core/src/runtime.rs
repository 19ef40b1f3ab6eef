//! The native runtime collaborator.
//!
//! ## Key Types
//!
//! - [`NativeRuntime`]: destructor, refcount and string entry points the registry calls
//! - [`NativeCall`]: the pointer-call ABI every native function is invoked through
//! - [`NativeVarCall`] and [`CallError`]: the variant-call ABI of vararg methods
//! - [`FunctionTable`]: native entry points keyed by [`FunctionId`] or dense index

use std::ffi::c_void;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::LookupError;
use crate::handle::RawWords;
use crate::hash::FunctionId;
use crate::layout::Shape;
use crate::tag::TypeTag;

/// Pointer-call entry point: receiver (or null), array of argument
/// pointers, return slot pointer, argument count.
pub type NativeCall =
    unsafe extern "C" fn(base: *mut c_void, args: *const *const c_void, ret: *mut c_void, argc: i64);

/// Variant-call entry point for vararg methods: receiver (or null), array
/// of pointers to three-word variants, argument count, return variant
/// pointer, error record.
pub type NativeVarCall = unsafe extern "C" fn(
    base: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
    error: *mut CallError,
);

/// Error record filled in by a [`NativeVarCall`]. The host receives it
/// exactly as the native side wrote it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallError {
    /// Zero on success; otherwise the native error code.
    pub error: i32,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.error == 0
    }
}

/// Lifetime entry points of the native runtime.
///
/// Implementations must be callable from any thread; host finalizers release
/// handles from whichever thread the host collector runs on.
pub trait NativeRuntime: Send + Sync {
    /// Runs the destructor for `tag` on a value the host owns.
    fn destroy(&self, tag: TypeTag, raw: &RawWords);

    /// Atomically increments the native reference count.
    fn reference(&self, tag: TypeTag, raw: &RawWords);

    /// Atomically decrements the native reference count. Returns `true` when
    /// the count reached zero and the value must be destroyed.
    fn unreference(&self, tag: TypeTag, raw: &RawWords) -> bool;

    /// Constructs a native string from UTF-8 text. The caller owns the result.
    fn new_string(&self, text: &str) -> RawWords;
}

#[derive(Clone, Copy)]
struct Entry {
    id: FunctionId,
    call: NativeCall,
    shape: Shape,
}

/// Native entry points, resolved once at load time.
#[derive(Default)]
pub struct FunctionTable {
    entries: Vec<Entry>,
    by_id: FxHashMap<FunctionId, usize>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            by_id: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Registers an entry point and returns its dense index.
    pub fn register(
        &mut self,
        id: FunctionId,
        call: NativeCall,
        shape: Shape,
    ) -> Result<usize, LookupError> {
        if self.by_id.contains_key(&id) {
            return Err(LookupError::Duplicate(id));
        }
        let index = self.entries.len();
        self.entries.push(Entry { id, call, shape });
        self.by_id.insert(id, index);
        log::trace!("registered native function {id} as #{index} {shape:?}");
        Ok(index)
    }

    /// Looks up an entry point and checks it has the shape the bindings
    /// were generated against.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn resolve(&self, id: FunctionId, expected: Shape) -> Result<NativeCall, LookupError> {
        let index = *self.by_id.get(&id).ok_or(LookupError::Missing(id))?;
        let entry = &self.entries[index];
        if entry.shape != expected {
            return Err(LookupError::ShapeMismatch {
                id,
                expected,
                found: entry.shape,
            });
        }
        Ok(entry.call)
    }

    /// Dense-index lookup.
    pub fn get(&self, index: usize) -> Result<(NativeCall, Shape), LookupError> {
        self.entries
            .get(index)
            .map(|entry| (entry.call, entry.shape))
            .ok_or(LookupError::BadIndex(index))
    }

    pub fn index_of(&self, id: FunctionId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn shape_of(&self, id: FunctionId) -> Option<Shape> {
        self.index_of(id).map(|index| self.entries[index].shape)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}
