//! Call signatures supplied by binding metadata.

use std::fmt;

use enginelink_core::{
    FunctionId, FunctionTable, LookupError, MAX_ARGS, NativeCall, NativeVarCall, OwnershipKind,
    Shape, SlotKind, TypeTag,
};

/// Declared return of a native function.
///
/// For handle-backed returns the ownership contract comes from the binding
/// metadata of each function; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnSpec {
    Void,
    /// A plain value copied out of the return slot.
    Value(SlotKind),
    /// A native handle of the given type.
    Handle { tag: TypeTag, contract: OwnershipKind },
    /// A variant; any handle it carries is registered under `contract`.
    Variant { contract: OwnershipKind },
}

impl ReturnSpec {
    /// Slot kind of the return slot.
    pub fn kind(&self) -> SlotKind {
        match self {
            ReturnSpec::Void => SlotKind::Void,
            ReturnSpec::Value(kind) => *kind,
            ReturnSpec::Handle { tag, .. } => tag
                .handle_width()
                .and_then(SlotKind::for_handle_width)
                .unwrap_or(SlotKind::Word1),
            ReturnSpec::Variant { .. } => SlotKind::Word3,
        }
    }
}

/// Calling convention of a native entry point.
#[derive(Clone, Copy)]
pub(crate) enum Entry {
    Ptr(NativeCall),
    Var(NativeVarCall),
}

/// Everything needed to call one native function.
#[derive(Clone, Copy)]
pub struct CallSpec {
    entry: Entry,
    shape: Shape,
    ret: ReturnSpec,
}

impl CallSpec {
    /// `shape.ret()` must match `ret.kind()`; signatures are verified by the
    /// binding generator, not here.
    pub fn new(call: NativeCall, shape: Shape, ret: ReturnSpec) -> Self {
        debug_assert_eq!(
            shape.ret(),
            ret.kind(),
            "return slot of {shape:?} does not hold {ret:?}"
        );
        Self {
            entry: Entry::Ptr(call),
            shape,
            ret,
        }
    }

    /// Builds a spec from argument kinds, deriving the return slot from `ret`.
    /// Returns `None` for more than [`MAX_ARGS`] arguments.
    pub fn from_args(call: NativeCall, args: &[SlotKind], ret: ReturnSpec) -> Option<Self> {
        let shape = Shape::new(ret.kind(), args)?;
        Some(Self {
            entry: Entry::Ptr(call),
            shape,
            ret,
        })
    }

    /// A vararg method called through the variant-call ABI with `argc`
    /// variant arguments. The return is a variant whose handle, if any, is
    /// registered under `contract`.
    pub fn vararg(call: NativeVarCall, argc: usize, contract: OwnershipKind) -> Option<Self> {
        let args = [SlotKind::Word3; MAX_ARGS];
        let ret = ReturnSpec::Variant { contract };
        let shape = Shape::new(ret.kind(), args.get(..argc)?)?;
        Some(Self {
            entry: Entry::Var(call),
            shape,
            ret,
        })
    }

    /// Resolves the entry point for `id` from a function table.
    pub fn resolve(
        table: &FunctionTable,
        id: FunctionId,
        shape: Shape,
        ret: ReturnSpec,
    ) -> Result<Self, LookupError> {
        let call = table.resolve(id, shape)?;
        Ok(Self::new(call, shape, ret))
    }

    /// The pointer-call entry point; `None` for a vararg spec.
    #[inline]
    pub fn call(&self) -> Option<NativeCall> {
        match self.entry {
            Entry::Ptr(call) => Some(call),
            Entry::Var(_) => None,
        }
    }

    #[inline]
    pub fn is_vararg(&self) -> bool {
        matches!(self.entry, Entry::Var(_))
    }

    #[inline]
    pub(crate) fn entry(&self) -> Entry {
        self.entry
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn ret(&self) -> ReturnSpec {
        self.ret
    }

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.shape.arg_count()
    }
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec")
            .field("vararg", &self.is_vararg())
            .field("shape", &self.shape)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}
