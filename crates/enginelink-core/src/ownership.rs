//! Ownership classes and their transition table.
//!
//! Every registry operation is resolved through [`step`], a total function of
//! the handle's ownership class, its state flags and the requested
//! [`Operation`]. The registry only executes the returned [`Step`]; it never
//! decides on its own whether something is allowed.
//!
//! | class            | Borrow | Release      | Transfer       | MarkCycle      | Finalize    | Collect     |
//! |------------------|--------|--------------|----------------|----------------|-------------|-------------|
//! | Owned            | Pass   | Destroy      | Move           | Mark           | Destroy     | Destroy     |
//! | SharedRefCounted | Pass   | Unreference  | Move           | Mark           | Unreference | Unreference |
//! | Borrowed         | Pass   | defect       | defect         | defect         | Forget      | Expire      |
//! | LifetimeBound    | Pass*  | defect       | defect         | defect         | Forget      | Forget      |
//!
//! `*` only while the parent is alive. A cycle-marked Owned handle turns
//! Destroy into Forget; a cycle-marked Shared handle turns Unreference into
//! Decrement, so the count still drops but the destructor never runs from
//! the host side. Any tombstoned handle turns
//! Finalize and Collect into Ignore and every other operation into a defect.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::DefectKind;
use crate::handle::{HandleId, ScopeId};

/// Ownership class of a handle, with the data each class needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Unique host reference; the native destructor runs exactly once.
    Owned,
    /// Valid until the given scope closes; never released by the host.
    Borrowed(ScopeId),
    /// Backed by the native reference count.
    SharedRefCounted,
    /// Valid while the parent handle is alive; never released on its own.
    LifetimeBound(HandleId),
}

impl Ownership {
    #[inline]
    pub const fn kind(&self) -> OwnershipKind {
        match self {
            Ownership::Owned => OwnershipKind::Owned,
            Ownership::Borrowed(_) => OwnershipKind::Borrowed,
            Ownership::SharedRefCounted => OwnershipKind::SharedRefCounted,
            Ownership::LifetimeBound(_) => OwnershipKind::LifetimeBound,
        }
    }
}

/// Ownership class without its payload.
///
/// Also used by binding metadata to declare the contract of a native
/// function's handle return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OwnershipKind {
    Owned = 0,
    Borrowed = 1,
    SharedRefCounted = 2,
    LifetimeBound = 3,
}

impl OwnershipKind {
    pub const ALL: [OwnershipKind; 4] = [
        OwnershipKind::Owned,
        OwnershipKind::Borrowed,
        OwnershipKind::SharedRefCounted,
        OwnershipKind::LifetimeBound,
    ];

    /// True for the classes that hold a native reference the host must give back.
    #[inline]
    pub const fn holds_reference(self) -> bool {
        matches!(self, OwnershipKind::Owned | OwnershipKind::SharedRefCounted)
    }
}

bitflags! {
    /// Lifetime state of a registry slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleFlags: u8 {
        /// Tombstone: the handle's life has ended.
        const RELEASED = 1 << 0;
        /// Ended by a transfer; set together with `RELEASED`.
        const MOVED = 1 << 1;
        /// Ended by its scope closing; set together with `RELEASED`.
        const EXPIRED = 1 << 2;
        /// Participates in a host/native reference cycle.
        const CYCLE = 1 << 3;
        /// The parent of a lifetime-bound handle is gone.
        const ORPHANED = 1 << 4;
    }
}

/// Operations the transition table knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Operation {
    Borrow = 0,
    Release = 1,
    Transfer = 2,
    MarkCycle = 3,
    /// The host wrapper was garbage collected.
    Finalize = 4,
    /// The scope holding the handle closed.
    Collect = 5,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Borrow,
        Operation::Release,
        Operation::Transfer,
        Operation::MarkCycle,
        Operation::Finalize,
        Operation::Collect,
    ];
}

/// What the registry must do for a given (class, state, operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Hand out the raw words; nothing changes.
    Pass,
    /// Run the native destructor, then tombstone.
    Destroy,
    /// Drop one native reference (destroying at zero), then tombstone.
    Unreference,
    /// Drop one native reference without destroying, then tombstone.
    Decrement,
    /// Tombstone without touching native state.
    Forget,
    /// Tombstone a borrowed handle whose scope ended.
    Expire,
    /// Tombstone the source as moved and issue a new handle of the same class.
    Move,
    /// Set the cycle flag.
    Mark,
    /// Nothing to do.
    Ignore,
    /// Programmer defect.
    Defect(DefectKind),
}

impl Step {
    /// True for steps that give a native reference back.
    #[inline]
    pub const fn is_native_release(self) -> bool {
        matches!(self, Step::Destroy | Step::Unreference | Step::Decrement)
    }

    /// True for steps that may run the native destructor.
    #[inline]
    pub const fn may_destroy(self) -> bool {
        matches!(self, Step::Destroy | Step::Unreference)
    }
}

/// The ownership transition table.
pub const fn step(kind: OwnershipKind, flags: HandleFlags, op: Operation) -> Step {
    let dead = flags.contains(HandleFlags::RELEASED);
    let owning = kind.holds_reference();

    if dead {
        return match op {
            Operation::Finalize | Operation::Collect => Step::Ignore,
            Operation::Release if owning => {
                if flags.contains(HandleFlags::MOVED) {
                    Step::Defect(DefectKind::UseAfterMove)
                } else {
                    Step::Defect(DefectKind::DoubleRelease)
                }
            }
            Operation::Release | Operation::Transfer | Operation::MarkCycle if !owning => {
                Step::Defect(unowned_defect(op))
            }
            _ => Step::Defect(dead_defect(flags)),
        };
    }

    match op {
        Operation::Borrow => {
            if matches!(kind, OwnershipKind::LifetimeBound) && flags.contains(HandleFlags::ORPHANED)
            {
                Step::Defect(DefectKind::ParentReleased)
            } else {
                Step::Pass
            }
        }
        Operation::Release | Operation::Finalize | Operation::Collect if owning => {
            let cycle = flags.contains(HandleFlags::CYCLE);
            match (kind, cycle) {
                (OwnershipKind::Owned, false) => Step::Destroy,
                (OwnershipKind::Owned, true) => Step::Forget,
                (_, false) => Step::Unreference,
                (_, true) => Step::Decrement,
            }
        }
        Operation::Release | Operation::Transfer | Operation::MarkCycle if !owning => {
            Step::Defect(unowned_defect(op))
        }
        Operation::Transfer => Step::Move,
        Operation::MarkCycle => Step::Mark,
        Operation::Collect if matches!(kind, OwnershipKind::Borrowed) => Step::Expire,
        _ => Step::Forget,
    }
}

const fn dead_defect(flags: HandleFlags) -> DefectKind {
    if flags.contains(HandleFlags::MOVED) {
        DefectKind::UseAfterMove
    } else if flags.contains(HandleFlags::EXPIRED) {
        DefectKind::BorrowEscaped
    } else {
        DefectKind::UseAfterRelease
    }
}

const fn unowned_defect(op: Operation) -> DefectKind {
    match op {
        Operation::Transfer => DefectKind::NotTransferable,
        Operation::MarkCycle => DefectKind::CycleOnUnowned,
        _ => DefectKind::ReleaseOfUnowned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_flags() -> impl Iterator<Item = HandleFlags> {
        (0u8..32).map(HandleFlags::from_bits_truncate)
    }

    #[test]
    fn live_owned() {
        let live = HandleFlags::empty();
        assert_eq!(step(OwnershipKind::Owned, live, Operation::Borrow), Step::Pass);
        assert_eq!(step(OwnershipKind::Owned, live, Operation::Release), Step::Destroy);
        assert_eq!(step(OwnershipKind::Owned, live, Operation::Transfer), Step::Move);
        assert_eq!(step(OwnershipKind::Owned, live, Operation::MarkCycle), Step::Mark);
        assert_eq!(step(OwnershipKind::Owned, live, Operation::Finalize), Step::Destroy);
        assert_eq!(step(OwnershipKind::Owned, live, Operation::Collect), Step::Destroy);
    }

    #[test]
    fn live_shared() {
        let live = HandleFlags::empty();
        let kind = OwnershipKind::SharedRefCounted;
        assert_eq!(step(kind, live, Operation::Release), Step::Unreference);
        assert_eq!(step(kind, live, Operation::Finalize), Step::Unreference);
        assert_eq!(step(kind, live, Operation::Transfer), Step::Move);
    }

    #[test]
    fn borrowed_is_never_released() {
        let live = HandleFlags::empty();
        let kind = OwnershipKind::Borrowed;
        assert_eq!(step(kind, live, Operation::Borrow), Step::Pass);
        assert_eq!(
            step(kind, live, Operation::Release),
            Step::Defect(DefectKind::ReleaseOfUnowned)
        );
        assert_eq!(
            step(kind, live, Operation::Transfer),
            Step::Defect(DefectKind::NotTransferable)
        );
        assert_eq!(
            step(kind, live, Operation::MarkCycle),
            Step::Defect(DefectKind::CycleOnUnowned)
        );
        assert_eq!(step(kind, live, Operation::Collect), Step::Expire);
        assert_eq!(step(kind, live, Operation::Finalize), Step::Forget);
    }

    #[test]
    fn expired_borrow_escapes() {
        let expired = HandleFlags::RELEASED | HandleFlags::EXPIRED;
        assert_eq!(
            step(OwnershipKind::Borrowed, expired, Operation::Borrow),
            Step::Defect(DefectKind::BorrowEscaped)
        );
        assert_eq!(
            step(OwnershipKind::Borrowed, expired, Operation::Release),
            Step::Defect(DefectKind::ReleaseOfUnowned)
        );
    }

    #[test]
    fn lifetime_bound_follows_parent() {
        let kind = OwnershipKind::LifetimeBound;
        assert_eq!(step(kind, HandleFlags::empty(), Operation::Borrow), Step::Pass);
        assert_eq!(
            step(kind, HandleFlags::ORPHANED, Operation::Borrow),
            Step::Defect(DefectKind::ParentReleased)
        );
    }

    #[test]
    fn tombstones() {
        let dead = HandleFlags::RELEASED;
        assert_eq!(
            step(OwnershipKind::Owned, dead, Operation::Release),
            Step::Defect(DefectKind::DoubleRelease)
        );
        assert_eq!(
            step(OwnershipKind::Owned, dead, Operation::Borrow),
            Step::Defect(DefectKind::UseAfterRelease)
        );
        assert_eq!(step(OwnershipKind::Owned, dead, Operation::Finalize), Step::Ignore);
        assert_eq!(step(OwnershipKind::Owned, dead, Operation::Collect), Step::Ignore);

        let moved = HandleFlags::RELEASED | HandleFlags::MOVED;
        assert_eq!(
            step(OwnershipKind::Owned, moved, Operation::Borrow),
            Step::Defect(DefectKind::UseAfterMove)
        );
        assert_eq!(
            step(OwnershipKind::Owned, moved, Operation::Release),
            Step::Defect(DefectKind::UseAfterMove)
        );
    }

    #[test]
    fn cycle_suppresses_destructor() {
        let cycle = HandleFlags::CYCLE;
        for op in [Operation::Release, Operation::Finalize, Operation::Collect] {
            assert_eq!(step(OwnershipKind::Owned, cycle, op), Step::Forget);
            assert_eq!(step(OwnershipKind::SharedRefCounted, cycle, op), Step::Decrement);
        }
        assert_eq!(
            step(
                OwnershipKind::Owned,
                cycle | HandleFlags::RELEASED,
                Operation::Release
            ),
            Step::Defect(DefectKind::DoubleRelease)
        );
    }

    #[test]
    fn table_is_total_and_never_releases_twice() {
        for kind in OwnershipKind::ALL {
            for flags in all_flags() {
                for op in Operation::ALL {
                    let result = step(kind, flags, op);
                    if flags.contains(HandleFlags::RELEASED) {
                        assert!(
                            !result.is_native_release(),
                            "{kind:?} {flags:?} {op:?} released a tombstoned handle"
                        );
                    }
                    if !kind.holds_reference() {
                        assert!(
                            !result.is_native_release(),
                            "{kind:?} {flags:?} {op:?} released an unowned handle"
                        );
                    }
                    if flags.contains(HandleFlags::CYCLE) {
                        assert!(
                            !result.may_destroy(),
                            "{kind:?} {flags:?} {op:?} destroyed a cycle-marked handle"
                        );
                    }
                }
            }
        }
    }
}
