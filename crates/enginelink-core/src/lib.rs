//! Core vocabulary shared by the handle registry and the call-frame marshaller.
//!
//! This crate has no state of its own. It defines:
//!
//! - [`Handle`], [`RawWords`] and [`TypeTag`]: what a native resource looks like on the host side
//! - [`Ownership`] and the [`step`](ownership::step) transition table
//! - [`SlotKind`], [`NativeValue`] and [`Shape`]: the exact byte layout of frame slots
//! - [`Variant`]: the closed dynamic value type
//! - [`FunctionId`], [`NativeCall`] and [`FunctionTable`]: how native entry points are found
//! - [`NativeVarCall`] and [`CallError`]: the variant-call ABI of vararg methods
//! - [`NativeRuntime`]: the lifetime entry points consumed from the engine
//! - defect types and the [`DefectPolicy`]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("the native pointer-call ABI is only supported on 64-bit targets");

pub mod error;
pub mod handle;
pub mod hash;
pub mod layout;
pub mod ownership;
pub mod runtime;
pub mod tag;
pub mod variant;

#[cfg(feature = "testing")]
pub mod testing;

pub use error::{DefectKind, DefectPolicy, DefectSite, LookupError, OwnershipDefect};
pub use handle::{Handle, HandleId, MAX_HANDLE_WORDS, RawWords, ScopeId, WrapperId};
pub use hash::FunctionId;
pub use layout::{MAX_ARGS, NativeBool, NativeValue, Shape, SlotKind, WORD};
pub use ownership::{HandleFlags, Operation, Ownership, OwnershipKind, Step};
pub use runtime::{CallError, FunctionTable, NativeCall, NativeRuntime, NativeVarCall};
pub use tag::TypeTag;
pub use variant::{InlineValue, Payload, Variant, VariantError, VariantWords};
