//! Host-side plumbing for calling into a native game engine.
//!
//! Two pieces sit between host code and the engine's pointer-call ABI:
//!
//! - the handle registry ([`enginelink_registry`]): every native resource the
//!   host can see is a registered [`Handle`] with an ownership class, and is
//!   released exactly once
//! - the call-frame marshaller ([`marshal`]): arguments are laid out in
//!   word-aligned slots, the native function is invoked, and returned handles
//!   are registered under their ownership contract
//!
//! ```no_run
//! use std::sync::Arc;
//! use enginelink::prelude::*;
//!
//! fn call(runtime: Arc<dyn NativeRuntime>, spec: CallSpec, node: Handle) {
//!     let registry = Arc::new(HandleRegistry::new(runtime));
//!     let marshaller = Marshaller::new(registry, FunctionTable::new());
//!
//!     let mut frame = marshaller.begin_call(&spec).with_receiver(&node);
//!     frame.put_str(0, "player");
//!     frame.invoke();
//!     frame.end();
//! }
//! ```

pub mod error;
pub mod marshal;

pub use enginelink_core::{
    CallError, DefectKind, DefectPolicy, FunctionId, FunctionTable, Handle, NativeCall,
    NativeRuntime, NativeVarCall, Ownership, OwnershipDefect, OwnershipKind, RawWords, Shape,
    SlotKind, TypeTag, Variant,
};
pub use enginelink_registry::{Arena, HandleRegistry, HostRef, RegistryConfig};
pub use error::MarshalDefect;
pub use marshal::{CallSpec, Frame, MarshalConfig, Marshaller, Phase, ReturnSpec, ReturnValue};

pub mod prelude {
    pub use crate::error::MarshalDefect;
    pub use crate::marshal::{
        CallSpec, Frame, MarshalConfig, Marshaller, Phase, RawValue, ReturnSpec, ReturnValue,
    };
    pub use enginelink_core::{
        CallError, DefectKind, DefectPolicy, FunctionId, FunctionTable, Handle, HandleId,
        LookupError, NativeBool, NativeCall, NativeRuntime, NativeValue, NativeVarCall, Ownership,
        OwnershipDefect, OwnershipKind, RawWords, ScopeId, Shape, SlotKind, TypeTag, Variant,
    };
    pub use enginelink_registry::{Arena, HandleRegistry, HostRef, RegistryConfig, RegistryStats};
}
