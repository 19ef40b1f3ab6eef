//! Marshalling defects.
//!
//! Like ownership defects, these are bugs in the calling code, never runtime
//! conditions. They are reported through the marshaller's
//! [`DefectPolicy`](enginelink_core::DefectPolicy).

use enginelink_core::{OwnershipDefect, SlotKind, TypeTag, VariantError};
use thiserror::Error;

use crate::marshal::{Phase, ReturnSpec};

/// Misuse of a call frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalDefect {
    /// An operation was called out of order.
    #[error("{op} called on a frame in phase {phase}")]
    PhaseViolation { op: &'static str, phase: Phase },

    #[error("argument {index} out of range for a call with {count} arguments")]
    ArgumentOutOfRange { index: usize, count: usize },

    /// A value of the wrong slot kind was written.
    #[error("argument {index} is declared {expected:?} but was written as {found:?}")]
    KindMismatch {
        index: usize,
        expected: SlotKind,
        found: SlotKind,
    },

    #[error("argument {index} was not written before invoke")]
    MissingArgument { index: usize },

    /// A lifetime-bound return needs a receiver to bind to.
    #[error("lifetime-bound {tag} return on a call without a receiver")]
    MissingReceiver { tag: TypeTag },

    /// The return slot was read as something other than what it was declared as.
    #[error("return declared as {declared:?} was read as {requested}")]
    ReturnMismatch {
        declared: ReturnSpec,
        requested: &'static str,
    },

    #[error(transparent)]
    Ownership(#[from] OwnershipDefect),

    #[error("malformed variant return: {0}")]
    Variant(#[from] VariantError),
}
