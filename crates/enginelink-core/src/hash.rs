//! Deterministic identifiers for native entry points.
//!
//! The engine exposes its functions through lookup tables keyed by name
//! (class name, method name and a per-method signature hash published in the
//! engine's API description). Generated bindings reference those entry points
//! long before the table is populated, so identifiers must be derivable from
//! names alone.
//!
//! [`FunctionId`] is a 64-bit XXHash of the name parts, mixed with a domain
//! constant so that a class method, a builtin-type method and a utility
//! function sharing a name never collide.
//!
//! ```
//! use enginelink_core::FunctionId;
//!
//! let a = FunctionId::method("Node", "set_name", 83702148);
//! let b = FunctionId::method("Node", "set_name", 83702148);
//! assert_eq!(a, b);
//! assert_ne!(a, FunctionId::method("Node", "get_name", 2002593661));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain mixing constants.
pub mod domain {
    /// Separator between name parts.
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Engine class methods (`Object` subclasses).
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Methods on builtin value types (String, Array, ...).
    pub const BUILTIN: u64 = 0x3e9f5d2a8c7b1403;

    /// Free-standing utility functions.
    pub const UTILITY: u64 = 0x5ea77ffbcdf5f302;

    /// Constructors of builtin value types.
    pub const CONSTRUCTOR: u64 = 0x9a7f3d5e2b8c4601;

    /// Entries of the runtime interface itself (`mem_alloc`, `variant_new_copy`, ...).
    pub const INTERFACE: u64 = 0x1a095090689d4647;
}

/// Stable identifier of a native function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FunctionId(pub u64);

impl FunctionId {
    /// Never produced by any constructor.
    pub const EMPTY: FunctionId = FunctionId(0);

    /// A method of an engine class, identified by the engine's signature hash.
    #[inline]
    pub fn method(class: &str, method: &str, signature: u32) -> Self {
        Self::mix(domain::METHOD, &[class, method], signature)
    }

    /// A method of a builtin value type.
    #[inline]
    pub fn builtin(type_name: &str, method: &str, signature: u32) -> Self {
        Self::mix(domain::BUILTIN, &[type_name, method], signature)
    }

    /// A utility function.
    #[inline]
    pub fn utility(name: &str, signature: u32) -> Self {
        Self::mix(domain::UTILITY, &[name], signature)
    }

    /// The `index`-th constructor of a builtin value type.
    #[inline]
    pub fn constructor(type_name: &str, index: u32) -> Self {
        Self::mix(domain::CONSTRUCTOR, &[type_name], index)
    }

    /// An entry of the runtime interface, looked up by its exported name.
    #[inline]
    pub fn interface(name: &str) -> Self {
        Self::mix(domain::INTERFACE, &[name], 0)
    }

    fn mix(seed: u64, parts: &[&str], signature: u32) -> Self {
        let mut hash = seed;
        for part in parts {
            // Multiplication keeps part order significant.
            hash = hash.wrapping_mul(domain::SEP) ^ xxh64(part.as_bytes(), 0);
        }
        hash = hash.wrapping_mul(domain::SEP) ^ u64::from(signature);
        if hash == 0 {
            hash = seed;
        }
        FunctionId(hash)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId({:#018x})", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
