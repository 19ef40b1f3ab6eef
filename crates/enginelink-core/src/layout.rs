//! Native slot layout.
//!
//! Every argument and return slot of a call frame has a [`SlotKind`] that fixes
//! its exact byte size and alignment on the native side. Rust types that may
//! be copied into a slot implement [`NativeValue`]; the size of each
//! implementation is checked against its kind at compile time.
//!
//! A [`Shape`] packs the kinds of a whole signature into one `u64`: the return
//! kind in the low nibble, then one nibble per argument.

use std::fmt;
use std::mem::{align_of, size_of};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;

/// Size of one slot word in bytes.
pub const WORD: usize = size_of::<usize>();

/// Maximum number of arguments a [`Shape`] can describe.
pub const MAX_ARGS: usize = 15;

/// Byte layout of a single frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SlotKind {
    Void = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float32 = 4,
    Float64 = 5,
    /// Two 32-bit lanes (Vector2, Vector2i).
    Bytes8 = 6,
    /// Three 32-bit lanes (Vector3, Vector3i).
    Bytes12 = 7,
    /// Four 32-bit lanes (Vector4, Rect2, Quaternion, Color, Plane).
    Bytes16 = 8,
    /// Transform2D.
    Bytes24 = 9,
    /// Basis.
    Bytes36 = 10,
    /// Transform3D.
    Bytes48 = 11,
    /// Projection.
    Bytes64 = 12,
    /// One machine word: object pointers, strings, C strings.
    Word1 = 13,
    /// Two machine words: callables, signals, packed arrays.
    Word2 = 14,
    /// Three machine words: variants.
    Word3 = 15,
}

impl SlotKind {
    /// Exact native size in bytes.
    pub const fn size(self) -> usize {
        match self {
            SlotKind::Void => 0,
            SlotKind::Bool => 1,
            SlotKind::Int32 | SlotKind::Float32 => 4,
            SlotKind::Int64 | SlotKind::Float64 | SlotKind::Bytes8 => 8,
            SlotKind::Bytes12 => 12,
            SlotKind::Bytes16 => 16,
            SlotKind::Bytes24 => 24,
            SlotKind::Bytes36 => 36,
            SlotKind::Bytes48 => 48,
            SlotKind::Bytes64 => 64,
            SlotKind::Word1 => WORD,
            SlotKind::Word2 => 2 * WORD,
            SlotKind::Word3 => 3 * WORD,
        }
    }

    /// Native alignment in bytes.
    pub const fn align(self) -> usize {
        match self {
            SlotKind::Void | SlotKind::Bool => 1,
            SlotKind::Int32 | SlotKind::Float32 => 4,
            SlotKind::Int64 | SlotKind::Float64 => 8,
            SlotKind::Bytes8
            | SlotKind::Bytes12
            | SlotKind::Bytes16
            | SlotKind::Bytes24
            | SlotKind::Bytes36
            | SlotKind::Bytes48
            | SlotKind::Bytes64 => 4,
            SlotKind::Word1 | SlotKind::Word2 | SlotKind::Word3 => align_of::<usize>(),
        }
    }

    /// Number of frame words the slot occupies. Every slot starts on a word
    /// boundary, which satisfies every kind's alignment.
    #[inline]
    pub const fn words(self) -> usize {
        self.size().div_ceil(WORD)
    }

    /// Kind of a slot holding a handle of the given width.
    pub const fn for_handle_width(width: u8) -> Option<SlotKind> {
        match width {
            1 => Some(SlotKind::Word1),
            2 => Some(SlotKind::Word2),
            3 => Some(SlotKind::Word3),
            _ => None,
        }
    }

    /// Kind of a slot holding a value of `size` bytes, if one exists.
    pub const fn for_value_size(size: usize) -> Option<SlotKind> {
        match size {
            8 => Some(SlotKind::Bytes8),
            12 => Some(SlotKind::Bytes12),
            16 => Some(SlotKind::Bytes16),
            24 => Some(SlotKind::Bytes24),
            36 => Some(SlotKind::Bytes36),
            48 => Some(SlotKind::Bytes48),
            64 => Some(SlotKind::Bytes64),
            _ => None,
        }
    }
}

/// A Rust type with the exact byte layout of a native slot kind.
///
/// # Safety
///
/// `size_of::<Self>()` must equal `Self::KIND.size()`, the alignment must not
/// exceed a machine word, every bit pattern of that size must be a valid
/// `Self` (including all zeroes), and the type must have no padding.
pub unsafe trait NativeValue: Copy + 'static {
    const KIND: SlotKind;
}

macro_rules! native_value {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            unsafe impl NativeValue for $ty {
                const KIND: SlotKind = SlotKind::$kind;
            }

            const _: () = {
                assert!(size_of::<$ty>() == SlotKind::$kind.size());
                assert!(align_of::<$ty>() <= align_of::<usize>());
            };
        )*
    };
}

native_value! {
    i32 => Int32,
    u32 => Int32,
    i64 => Int64,
    u64 => Int64,
    f32 => Float32,
    f64 => Float64,
    OrderedFloat<f32> => Float32,
    OrderedFloat<f64> => Float64,
    [f32; 2] => Bytes8,
    [i32; 2] => Bytes8,
    [f32; 3] => Bytes12,
    [i32; 3] => Bytes12,
    [f32; 4] => Bytes16,
    [i32; 4] => Bytes16,
    [f32; 6] => Bytes24,
    [f32; 9] => Bytes36,
    [f32; 12] => Bytes48,
    [f32; 16] => Bytes64,
    [u8; 8] => Bytes8,
    [u8; 16] => Bytes16,
}

// Native bools are a single byte holding 0 or 1. Rust `bool` forbids other
// bit patterns, so bools go through this wrapper.
/// Native boolean slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NativeBool(pub u8);

impl NativeBool {
    pub const TRUE: NativeBool = NativeBool(1);
    pub const FALSE: NativeBool = NativeBool(0);

    #[inline]
    pub const fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for NativeBool {
    #[inline]
    fn from(value: bool) -> Self {
        NativeBool(value as u8)
    }
}

impl From<NativeBool> for bool {
    #[inline]
    fn from(value: NativeBool) -> Self {
        value.get()
    }
}

native_value! {
    NativeBool => Bool,
}

/// Return kind plus argument kinds of a native signature, packed into a `u64`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Shape(u64);

impl Shape {
    /// `void f()`.
    pub const VOID: Shape = Shape(0);

    /// Returns `None` for more than [`MAX_ARGS`] arguments or a `Void` argument.
    pub fn new(ret: SlotKind, args: &[SlotKind]) -> Option<Self> {
        if args.len() > MAX_ARGS {
            return None;
        }
        let mut bits = u64::from(u8::from(ret));
        for (i, kind) in args.iter().enumerate() {
            if *kind == SlotKind::Void {
                return None;
            }
            bits |= u64::from(u8::from(*kind)) << (4 * (i + 1));
        }
        Some(Shape(bits))
    }

    /// Decodes packed bits, rejecting gaps in the argument list.
    pub fn from_bits(bits: u64) -> Option<Self> {
        let shape = Shape(bits);
        let count = shape.arg_count();
        if bits.checked_shr(4 * (count as u32 + 1)).unwrap_or(0) != 0 {
            return None;
        }
        Some(shape)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn ret(self) -> SlotKind {
        Self::nibble(self.0)
    }

    pub fn arg(self, index: usize) -> Option<SlotKind> {
        if index >= MAX_ARGS {
            return None;
        }
        match Self::nibble(self.0 >> (4 * (index + 1))) {
            SlotKind::Void => None,
            kind => Some(kind),
        }
    }

    pub fn arg_count(self) -> usize {
        (0..MAX_ARGS)
            .take_while(|i| (self.0 >> (4 * (i + 1))) & 0xf != 0)
            .count()
    }

    pub fn args(self) -> impl Iterator<Item = SlotKind> {
        (0..self.arg_count()).filter_map(move |i| self.arg(i))
    }

    /// Total frame words for all arguments plus the return slot.
    pub fn frame_words(self) -> usize {
        self.args().map(SlotKind::words).sum::<usize>() + self.ret().words()
    }

    #[inline]
    fn nibble(bits: u64) -> SlotKind {
        // Every nibble value names a kind.
        SlotKind::try_from((bits & 0xf) as u8).unwrap_or(SlotKind::Void)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.args().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kind:?}")?;
        }
        write!(f, ") -> {:?}", self.ret())
    }
}
