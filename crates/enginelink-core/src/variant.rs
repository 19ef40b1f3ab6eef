//! The closed variant type.
//!
//! Dynamically typed engine values are one of a fixed set of cases. Scalars
//! and small value types are carried by value; everything stored out of line
//! in native memory is carried as a [`Handle`], whose tag selects the native
//! conversion functions.
//!
//! In a frame a variant occupies a `Word3` slot laid out as
//! `[tag, payload0, payload1]`.

use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::handle::{Handle, RawWords};
use crate::layout::NativeValue;
use crate::tag::TypeTag;

/// The three words of a variant slot.
pub type VariantWords = [usize; 3];

/// A value type of at most 16 bytes stored inside the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineValue {
    tag: TypeTag,
    bytes: [u8; 16],
}

impl InlineValue {
    /// Returns `None` if `tag` is not an inline type or `T` has the wrong size.
    pub fn new<T: NativeValue>(tag: TypeTag, value: T) -> Option<Self> {
        let size = tag.inline_size()?;
        if size != T::KIND.size() {
            return None;
        }
        let mut bytes = [0u8; 16];
        // SAFETY: NativeValue types have no padding and `size` bytes fit `bytes`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (&value as *const T).cast::<u8>(),
                bytes.as_mut_ptr(),
                size,
            );
        }
        Some(Self { tag, bytes })
    }

    pub fn get<T: NativeValue>(&self) -> Option<T> {
        if self.tag.inline_size() != Some(T::KIND.size()) {
            return None;
        }
        // SAFETY: size checked above; any bit pattern is a valid NativeValue.
        Some(unsafe { std::ptr::read_unaligned(self.bytes.as_ptr().cast::<T>()) })
    }

    #[inline]
    pub const fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub const fn bytes(&self) -> &[u8; 16] {
        &self.bytes
    }
}

/// A dynamically typed engine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Nil,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Inline(InlineValue),
    String(Handle),
    StringName(Handle),
    NodePath(Handle),
    Rid(Handle),
    Object(Handle),
    Callable(Handle),
    Signal(Handle),
    Dictionary(Handle),
    Array(Handle),
    PackedArray(Handle),
}

/// Failure to decode a variant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VariantError {
    #[error("unknown variant tag {0}")]
    UnknownTag(usize),

    #[error("{0} variants are stored out of line and cannot be marshalled by value")]
    Unsupported(TypeTag),
}

/// A decoded variant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// A complete value.
    Value(Variant),
    /// Raw handle words that still have to be registered.
    Handle(TypeTag, RawWords),
}

impl Variant {
    pub fn tag(&self) -> TypeTag {
        match self {
            Variant::Nil => TypeTag::Nil,
            Variant::Bool(_) => TypeTag::Bool,
            Variant::Int(_) => TypeTag::Int,
            Variant::Float(_) => TypeTag::Float,
            Variant::Inline(value) => value.tag(),
            Variant::String(h)
            | Variant::StringName(h)
            | Variant::NodePath(h)
            | Variant::Rid(h)
            | Variant::Object(h)
            | Variant::Callable(h)
            | Variant::Signal(h)
            | Variant::Dictionary(h)
            | Variant::Array(h)
            | Variant::PackedArray(h) => h.tag(),
        }
    }

    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Variant::String(h)
            | Variant::StringName(h)
            | Variant::NodePath(h)
            | Variant::Rid(h)
            | Variant::Object(h)
            | Variant::Callable(h)
            | Variant::Signal(h)
            | Variant::Dictionary(h)
            | Variant::Array(h)
            | Variant::PackedArray(h) => Some(h),
            _ => None,
        }
    }

    /// Picks the case matching the handle's tag.
    pub fn from_handle(handle: Handle) -> Option<Self> {
        let variant = match handle.tag() {
            TypeTag::String => Variant::String(handle),
            TypeTag::StringName => Variant::StringName(handle),
            TypeTag::NodePath => Variant::NodePath(handle),
            TypeTag::Rid => Variant::Rid(handle),
            TypeTag::Object => Variant::Object(handle),
            TypeTag::Callable => Variant::Callable(handle),
            TypeTag::Signal => Variant::Signal(handle),
            TypeTag::Dictionary => Variant::Dictionary(handle),
            TypeTag::Array => Variant::Array(handle),
            tag if tag.is_packed_array() => Variant::PackedArray(handle),
            _ => return None,
        };
        Some(variant)
    }

    #[inline]
    pub fn float(value: f64) -> Self {
        Variant::Float(OrderedFloat(value))
    }

    #[inline]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Slot words for by-value cases; `None` for handle cases, which must be
    /// borrowed through the registry and encoded with [`encode_handle`].
    pub fn encode_value(&self) -> Option<VariantWords> {
        let tag = self.tag() as usize;
        let words = match self {
            Variant::Nil => [tag, 0, 0],
            Variant::Bool(b) => [tag, *b as usize, 0],
            Variant::Int(i) => [tag, *i as u64 as usize, 0],
            Variant::Float(f) => [tag, f.0.to_bits() as usize, 0],
            Variant::Inline(value) => {
                let (lo, hi) = value.bytes.split_at(8);
                [tag, word_from(lo), word_from(hi)]
            }
            _ => return None,
        };
        Some(words)
    }
}

/// Slot words for a handle-backed variant.
pub fn encode_handle(tag: TypeTag, raw: &RawWords) -> VariantWords {
    let mut words = [tag as usize, 0, 0];
    for (slot, word) in words[1..].iter_mut().zip(raw.as_slice()) {
        *slot = *word;
    }
    words
}

/// Decodes a variant slot.
pub fn decode(words: &VariantWords) -> Result<Payload, VariantError> {
    let [tag, p0, p1] = *words;
    let tag = u8::try_from(tag)
        .ok()
        .and_then(|raw| TypeTag::try_from(raw).ok())
        .ok_or(VariantError::UnknownTag(tag))?;

    if let Some(width) = tag.handle_width() {
        let raw = match width {
            1 => RawWords::one(p0),
            _ => RawWords::two(p0, p1),
        };
        return Ok(Payload::Handle(tag, raw));
    }

    let value = match tag {
        TypeTag::Nil => Variant::Nil,
        TypeTag::Bool => Variant::Bool(p0 & 0xff != 0),
        TypeTag::Int => Variant::Int(p0 as u64 as i64),
        TypeTag::Float => Variant::float(f64::from_bits(p0 as u64)),
        _ if tag.inline_size().is_some() => {
            let mut bytes = [0u8; 16];
            bytes[..8].copy_from_slice(&(p0 as u64).to_ne_bytes());
            bytes[8..].copy_from_slice(&(p1 as u64).to_ne_bytes());
            Variant::Inline(InlineValue { tag, bytes })
        }
        _ => return Err(VariantError::Unsupported(tag)),
    };
    Ok(Payload::Value(value))
}

fn word_from(bytes: &[u8]) -> usize {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    u64::from_ne_bytes(word) as usize
}
