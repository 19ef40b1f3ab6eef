use enginelink_core::{Handle, NativeValue, SlotKind, Variant};

/// Largest plain value a return slot can hold.
const MAX_VALUE_BYTES: usize = 64;

/// A plain value copied out of a return slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawValue {
    kind: SlotKind,
    bytes: [u8; MAX_VALUE_BYTES],
}

impl RawValue {
    pub(crate) fn new(kind: SlotKind, bytes: &[u8]) -> Self {
        let mut buf = [0u8; MAX_VALUE_BYTES];
        let len = kind.size().min(bytes.len()).min(MAX_VALUE_BYTES);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self { kind, bytes: buf }
    }

    #[inline]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.kind.size().min(MAX_VALUE_BYTES)]
    }

    /// The value as `T`, if `T` has this value's slot kind.
    pub fn get<T: NativeValue>(&self) -> Option<T> {
        if T::KIND != self.kind {
            return None;
        }
        // SAFETY: `bytes` holds at least size_of::<T>() bytes and every bit
        // pattern is a valid NativeValue; read_unaligned for the byte buffer.
        Some(unsafe { std::ptr::read_unaligned(self.bytes.as_ptr().cast::<T>()) })
    }
}

impl std::fmt::Debug for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawValue")
            .field("kind", &self.kind)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// The return of a native call, shaped by its [`ReturnSpec`](super::ReturnSpec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnValue {
    Void,
    Value(RawValue),
    /// `None` when the call returned a null handle.
    Handle(Option<Handle>),
    Variant(Variant),
}

impl ReturnValue {
    pub fn is_void(&self) -> bool {
        matches!(self, ReturnValue::Void)
    }

    pub fn value<T: NativeValue>(&self) -> Option<T> {
        match self {
            ReturnValue::Value(raw) => raw.get(),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            ReturnValue::Handle(handle) => *handle,
            ReturnValue::Variant(variant) => variant.handle().copied(),
            _ => None,
        }
    }

    pub fn variant(&self) -> Option<Variant> {
        match self {
            ReturnValue::Variant(variant) => Some(*variant),
            _ => None,
        }
    }
}
