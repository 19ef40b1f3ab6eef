//! The handle registry.
//!
//! The single authority for native handle lifetimes and ownership-class
//! transitions.
//!
//! ## Key Types
//!
//! - [`HandleRegistry`]: generational slot table with tombstones and the cycle side table
//! - [`Arena`]: a bulk-release scope for transient handles
//! - [`HostRef`]: a host wrapper that finalizes its handle on drop
//! - [`RegistryConfig`] and [`RegistryStats`]
//!
//! ```
//! use std::sync::Arc;
//! use enginelink_core::testing::CountingRuntime;
//! use enginelink_core::{Ownership, TypeTag};
//! use enginelink_registry::HandleRegistry;
//!
//! let runtime = Arc::new(CountingRuntime::new());
//! let registry = HandleRegistry::new(runtime.clone());
//!
//! let raw = runtime.alloc(TypeTag::Object);
//! let handle = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
//! assert_eq!(registry.borrow(&handle), raw);
//!
//! registry.release(handle);
//! assert!(registry.try_release(handle).is_err());
//! assert_eq!(runtime.destroy_count(&raw), 1);
//! ```

mod arena;
mod config;
mod host_ref;
mod registry;
mod slot;

pub use arena::Arena;
pub use config::RegistryConfig;
pub use host_ref::HostRef;
pub use registry::{HandleRegistry, RegistryStats};
