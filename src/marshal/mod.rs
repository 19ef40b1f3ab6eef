//! Call-frame marshalling.
//!
//! A [`Frame`] carries the arguments and return of one native call:
//!
//! ```text
//! begin_call ─► put* ─► invoke ─► read* ─► end
//!  Unopened    Populated  Invoked  Consumed  Released
//! ```
//!
//! Arguments are written into word-aligned slots exactly as the native
//! calling convention expects. Handle arguments are borrowed from the
//! registry; transient strings created for a call belong to the frame's
//! arena and are released by [`Frame::end`]. Handle returns are registered
//! under the ownership contract of the function's [`ReturnSpec`].

mod frame;
mod signature;
mod storage;
mod value;

use std::fmt;
use std::sync::Arc;

use enginelink_core::{DefectPolicy, FunctionId, FunctionTable, LookupError, Shape};
use enginelink_registry::{Arena, HandleRegistry};

pub use frame::Frame;
pub use signature::{CallSpec, ReturnSpec};
pub use storage::INLINE_WORDS;
pub use value::{RawValue, ReturnValue};

/// Lifecycle position of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Unopened,
    Populated,
    Invoked,
    Consumed,
    Released,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Unopened => "unopened",
            Phase::Populated => "populated",
            Phase::Invoked => "invoked",
            Phase::Consumed => "consumed",
            Phase::Released => "released",
        })
    }
}

/// Marshaller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalConfig {
    pub on_defect: DefectPolicy,
    /// Check the slot kind of every argument write and return read against
    /// the call's shape.
    pub verify_kinds: bool,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            on_defect: DefectPolicy::default(),
            verify_kinds: cfg!(debug_assertions),
        }
    }
}

impl MarshalConfig {
    pub fn with_on_defect(mut self, policy: DefectPolicy) -> Self {
        self.on_defect = policy;
        self
    }

    pub fn with_verify_kinds(mut self, verify: bool) -> Self {
        self.verify_kinds = verify;
        self
    }
}

/// Opens call frames against one registry and function table.
pub struct Marshaller {
    registry: Arc<HandleRegistry>,
    functions: FunctionTable,
    config: MarshalConfig,
}

impl Marshaller {
    pub fn new(registry: Arc<HandleRegistry>, functions: FunctionTable) -> Self {
        Self::with_config(registry, functions, MarshalConfig::default())
    }

    pub fn with_config(
        registry: Arc<HandleRegistry>,
        functions: FunctionTable,
        config: MarshalConfig,
    ) -> Self {
        Self {
            registry,
            functions,
            config,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    #[inline]
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    #[inline]
    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    /// Looks up a call spec in this marshaller's function table.
    pub fn resolve(
        &self,
        id: FunctionId,
        shape: Shape,
        ret: ReturnSpec,
    ) -> Result<CallSpec, LookupError> {
        CallSpec::resolve(&self.functions, id, shape, ret)
    }

    /// Opens a frame. Borrowed returns are bound to the frame's own arena and
    /// expire at [`Frame::end`].
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn begin_call(&self, spec: &CallSpec) -> Frame<'_> {
        Frame::new(self, *spec, None)
    }

    /// Opens a frame whose Borrowed returns are bound to `scope` instead of
    /// the frame, so they stay usable after the frame ends. The scope cannot
    /// be closed while the frame is open:
    ///
    /// ```compile_fail
    /// # use enginelink::prelude::*;
    /// # fn call(marshaller: &Marshaller, spec: &CallSpec) {
    /// let mut scope = marshaller.registry().open_scope();
    /// let frame = marshaller.begin_call_in(spec, &scope);
    /// scope.close();
    /// drop(frame);
    /// # }
    /// ```
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn begin_call_in<'a>(&'a self, spec: &CallSpec, scope: &'a Arena<'_>) -> Frame<'a> {
        Frame::new(self, *spec, Some(scope.scope()))
    }

    #[track_caller]
    pub(crate) fn report(&self, defect: &crate::MarshalDefect) {
        self.config.on_defect.report(defect);
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller")
            .field("functions", &self.functions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
