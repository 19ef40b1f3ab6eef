//! Defect and error types.
//!
//! Nothing in this layer is a recoverable runtime condition. Ownership and
//! marshalling mistakes are programmer defects; a [`DefectPolicy`] decides
//! whether they trap or are logged. The only `Result` a caller is expected to
//! handle is [`LookupError`], produced while binding tables are loaded.
//!
//! ```text
//! OwnershipDefect  - double release, use after release, escaped borrows, ...
//! LookupError      - function table resolution at load time
//! ```

use std::fmt;
use std::panic::Location;

use thiserror::Error;

use crate::handle::HandleId;
use crate::hash::FunctionId;
use crate::layout::Shape;
use crate::tag::TypeTag;

/// How a detected defect is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefectPolicy {
    /// Panic with the diagnostic.
    Trap,
    /// Log the diagnostic at error level and continue best-effort.
    Log,
}

impl Default for DefectPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DefectPolicy::Trap
        } else {
            DefectPolicy::Log
        }
    }
}

impl DefectPolicy {
    /// Reports a defect according to the policy.
    #[track_caller]
    pub fn report(self, defect: &dyn fmt::Display) {
        match self {
            DefectPolicy::Trap => panic!("{defect}"),
            DefectPolicy::Log => log::error!("{defect}"),
        }
    }
}

/// Where and on what a defect happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefectSite {
    pub tag: TypeTag,
    pub handle: HandleId,
    /// Where the handle was wrapped or acquired.
    pub allocated_at: &'static Location<'static>,
}

impl fmt::Display for DefectSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} handle {} allocated at {}",
            self.tag, self.handle, self.allocated_at
        )
    }
}

/// Discriminant of an [`OwnershipDefect`], as produced by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefectKind {
    DoubleRelease,
    UseAfterRelease,
    BorrowEscaped,
    UseAfterMove,
    ParentReleased,
    StaleHandle,
    ReleaseOfUnowned,
    NotTransferable,
    CycleOnUnowned,
    ScopeClosed,
}

impl DefectKind {
    /// Attaches the handle details.
    pub const fn at(self, site: DefectSite) -> OwnershipDefect {
        match self {
            DefectKind::DoubleRelease => OwnershipDefect::DoubleRelease(site),
            DefectKind::UseAfterRelease => OwnershipDefect::UseAfterRelease(site),
            DefectKind::BorrowEscaped => OwnershipDefect::BorrowEscaped(site),
            DefectKind::UseAfterMove => OwnershipDefect::UseAfterMove(site),
            DefectKind::ParentReleased => OwnershipDefect::ParentReleased(site),
            DefectKind::StaleHandle => OwnershipDefect::StaleHandle(site),
            DefectKind::ReleaseOfUnowned => OwnershipDefect::ReleaseOfUnowned(site),
            DefectKind::NotTransferable => OwnershipDefect::NotTransferable(site),
            DefectKind::CycleOnUnowned => OwnershipDefect::CycleOnUnowned(site),
            DefectKind::ScopeClosed => OwnershipDefect::ScopeClosed(site),
        }
    }
}

/// Misuse of a handle's ownership class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnershipDefect {
    /// Release of a handle that was already released.
    #[error("double release of {0}")]
    DoubleRelease(DefectSite),

    /// Use of a handle after its release.
    #[error("use after release of {0}")]
    UseAfterRelease(DefectSite),

    /// Use of a borrowed handle after its scope closed.
    #[error("borrowed {0} used after its scope closed")]
    BorrowEscaped(DefectSite),

    /// Use of a handle after it was transferred.
    #[error("use after transfer of {0}")]
    UseAfterMove(DefectSite),

    /// Use of a lifetime-bound handle whose parent is gone.
    #[error("parent of lifetime-bound {0} was released")]
    ParentReleased(DefectSite),

    /// The handle was not issued by this registry.
    #[error("unknown {0}")]
    StaleHandle(DefectSite),

    /// Release of a borrowed or lifetime-bound handle.
    #[error("release of unowned {0}")]
    ReleaseOfUnowned(DefectSite),

    /// Transfer of a borrowed or lifetime-bound handle.
    #[error("transfer of unowned {0}")]
    NotTransferable(DefectSite),

    /// Cycle mark on a borrowed or lifetime-bound handle.
    #[error("cycle mark on unowned {0}")]
    CycleOnUnowned(DefectSite),

    /// A handle was bound to a scope that is no longer open.
    #[error("{0} bound to a closed scope")]
    ScopeClosed(DefectSite),
}

impl OwnershipDefect {
    pub const fn site(&self) -> &DefectSite {
        match self {
            OwnershipDefect::DoubleRelease(site)
            | OwnershipDefect::UseAfterRelease(site)
            | OwnershipDefect::BorrowEscaped(site)
            | OwnershipDefect::UseAfterMove(site)
            | OwnershipDefect::ParentReleased(site)
            | OwnershipDefect::StaleHandle(site)
            | OwnershipDefect::ReleaseOfUnowned(site)
            | OwnershipDefect::NotTransferable(site)
            | OwnershipDefect::CycleOnUnowned(site)
            | OwnershipDefect::ScopeClosed(site) => site,
        }
    }

    pub const fn kind(&self) -> DefectKind {
        match self {
            OwnershipDefect::DoubleRelease(_) => DefectKind::DoubleRelease,
            OwnershipDefect::UseAfterRelease(_) => DefectKind::UseAfterRelease,
            OwnershipDefect::BorrowEscaped(_) => DefectKind::BorrowEscaped,
            OwnershipDefect::UseAfterMove(_) => DefectKind::UseAfterMove,
            OwnershipDefect::ParentReleased(_) => DefectKind::ParentReleased,
            OwnershipDefect::StaleHandle(_) => DefectKind::StaleHandle,
            OwnershipDefect::ReleaseOfUnowned(_) => DefectKind::ReleaseOfUnowned,
            OwnershipDefect::NotTransferable(_) => DefectKind::NotTransferable,
            OwnershipDefect::CycleOnUnowned(_) => DefectKind::CycleOnUnowned,
            OwnershipDefect::ScopeClosed(_) => DefectKind::ScopeClosed,
        }
    }
}

/// Failure to resolve a native entry point from a [`FunctionTable`](crate::FunctionTable).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no native function registered for {0}")]
    Missing(FunctionId),

    #[error("native function {id} has shape {found:?}, bindings expect {expected:?}")]
    ShapeMismatch {
        id: FunctionId,
        expected: Shape,
        found: Shape,
    },

    #[error("native function {0} registered twice")]
    Duplicate(FunctionId),

    #[error("no native function at index {0}")]
    BadIndex(usize),
}
