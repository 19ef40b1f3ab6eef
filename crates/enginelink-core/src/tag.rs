//! Native type tags.
//!
//! A [`TypeTag`] is the discriminant the native runtime uses to pick the
//! destructor, retain and release entry points for a value. The numbering
//! matches the engine's variant type enumeration so a tag can be written into a
//! variant slot unchanged.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Discriminant of a native value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeTag {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl TypeTag {
    /// Number of raw words a handle of this type occupies, or `None` for
    /// plain value types that are never tracked by the registry.
    pub const fn handle_width(self) -> Option<u8> {
        match self {
            TypeTag::String
            | TypeTag::StringName
            | TypeTag::NodePath
            | TypeTag::Rid
            | TypeTag::Object
            | TypeTag::Dictionary
            | TypeTag::Array => Some(1),
            TypeTag::Callable
            | TypeTag::Signal
            | TypeTag::PackedByteArray
            | TypeTag::PackedInt32Array
            | TypeTag::PackedInt64Array
            | TypeTag::PackedFloat32Array
            | TypeTag::PackedFloat64Array
            | TypeTag::PackedStringArray
            | TypeTag::PackedVector2Array
            | TypeTag::PackedVector3Array
            | TypeTag::PackedColorArray
            | TypeTag::PackedVector4Array => Some(2),
            _ => None,
        }
    }

    /// True for types whose values live out of line in native storage.
    #[inline]
    pub const fn is_handle(self) -> bool {
        self.handle_width().is_some()
    }

    /// Byte size of small value types that a variant carries inline.
    pub const fn inline_size(self) -> Option<usize> {
        match self {
            TypeTag::Vector2 | TypeTag::Vector2i => Some(8),
            TypeTag::Vector3 | TypeTag::Vector3i => Some(12),
            TypeTag::Rect2
            | TypeTag::Rect2i
            | TypeTag::Vector4
            | TypeTag::Vector4i
            | TypeTag::Plane
            | TypeTag::Quaternion
            | TypeTag::Color => Some(16),
            _ => None,
        }
    }

    /// True for the packed (contiguous, variable-length) array types.
    #[inline]
    pub const fn is_packed_array(self) -> bool {
        (self as u8) >= (TypeTag::PackedByteArray as u8)
    }

    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "Nil",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "String",
            TypeTag::Vector2 => "Vector2",
            TypeTag::Vector2i => "Vector2i",
            TypeTag::Rect2 => "Rect2",
            TypeTag::Rect2i => "Rect2i",
            TypeTag::Vector3 => "Vector3",
            TypeTag::Vector3i => "Vector3i",
            TypeTag::Transform2D => "Transform2D",
            TypeTag::Vector4 => "Vector4",
            TypeTag::Vector4i => "Vector4i",
            TypeTag::Plane => "Plane",
            TypeTag::Quaternion => "Quaternion",
            TypeTag::Aabb => "AABB",
            TypeTag::Basis => "Basis",
            TypeTag::Transform3D => "Transform3D",
            TypeTag::Projection => "Projection",
            TypeTag::Color => "Color",
            TypeTag::StringName => "StringName",
            TypeTag::NodePath => "NodePath",
            TypeTag::Rid => "RID",
            TypeTag::Object => "Object",
            TypeTag::Callable => "Callable",
            TypeTag::Signal => "Signal",
            TypeTag::Dictionary => "Dictionary",
            TypeTag::Array => "Array",
            TypeTag::PackedByteArray => "PackedByteArray",
            TypeTag::PackedInt32Array => "PackedInt32Array",
            TypeTag::PackedInt64Array => "PackedInt64Array",
            TypeTag::PackedFloat32Array => "PackedFloat32Array",
            TypeTag::PackedFloat64Array => "PackedFloat64Array",
            TypeTag::PackedStringArray => "PackedStringArray",
            TypeTag::PackedVector2Array => "PackedVector2Array",
            TypeTag::PackedVector3Array => "PackedVector3Array",
            TypeTag::PackedColorArray => "PackedColorArray",
            TypeTag::PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
