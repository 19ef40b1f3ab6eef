//! The handle registry.
//!
//! Every native handle the host holds is registered here. The registry owns
//! the authoritative ownership class of each handle, tombstones handles when
//! their life ends and turns every misuse into an [`OwnershipDefect`].
//!
//! Bookkeeping happens under a single lock; native destroy and refcount calls
//! are made after the lock is dropped, so a native destructor may re-enter
//! the registry.

use std::fmt;
use std::num::NonZeroU64;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use enginelink_core::ownership::step;
use enginelink_core::{
    DefectKind, DefectSite, Handle, HandleFlags, HandleId, NativeRuntime, Operation, Ownership,
    OwnershipDefect, OwnershipKind, RawWords, ScopeId, Step, TypeTag, WrapperId,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::arena::Arena;
use crate::config::RegistryConfig;
use crate::host_ref::HostRef;
use crate::slot::SlotTable;

/// Counters for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Handles currently alive.
    pub live: usize,
    /// Handles whose life ended through release, finalization or scope close.
    pub released: u64,
    /// Dead slots waiting for reuse.
    pub tombstoned: usize,
    pub scopes_open: usize,
}

/// Native work decided under the lock and run after it.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Nothing,
    Destroy(TypeTag, RawWords),
    Unreference(TypeTag, RawWords),
    Decrement(TypeTag, RawWords),
}

struct State {
    slots: SlotTable,
    scopes: FxHashMap<ScopeId, Vec<HandleId>>,
    cycles: FxHashMap<HandleId, WrapperId>,
    next_scope: u32,
    released: u64,
}

impl State {
    fn new(capacity: usize) -> Self {
        Self {
            slots: SlotTable::with_capacity(capacity),
            scopes: FxHashMap::default(),
            cycles: FxHashMap::default(),
            next_scope: 0,
            released: 0,
        }
    }

    /// Current state flags of the slot `handle` was issued for.
    fn flags(&self, handle: &Handle) -> Result<HandleFlags, DefectKind> {
        let id = handle.id();
        if let Some(slot) = self.slots.get(id) {
            let mut flags = slot.flags;
            if !slot.is_dead() && self.slots.is_orphaned(slot) {
                flags |= HandleFlags::ORPHANED;
            }
            return Ok(flags);
        }
        if let Some(flags) = self.slots.retired(id) {
            return Ok(flags);
        }
        if self.slots.issued(id) {
            // Reused more than once: only the class tells how the life ended.
            let mut flags = HandleFlags::RELEASED;
            if handle.kind() == OwnershipKind::Borrowed {
                flags |= HandleFlags::EXPIRED;
            }
            return Ok(flags);
        }
        Err(DefectKind::StaleHandle)
    }

    /// Checks that the scope or parent a new handle is bound to is alive.
    fn check_binding(&self, ownership: Ownership) -> Result<(), DefectKind> {
        match ownership {
            Ownership::Borrowed(scope) if !self.scopes.contains_key(&scope) => {
                Err(DefectKind::ScopeClosed)
            }
            Ownership::LifetimeBound(parent) if !self.slots.is_live(parent) => {
                Err(DefectKind::ParentReleased)
            }
            _ => Ok(()),
        }
    }

    fn insert(
        &mut self,
        raw: RawWords,
        tag: TypeTag,
        ownership: Ownership,
        flags: HandleFlags,
        site: &'static Location<'static>,
    ) -> Handle {
        let id = self.slots.insert(tag, ownership, raw, flags, site);
        if let Ownership::Borrowed(scope) = ownership
            && let Some(members) = self.scopes.get_mut(&scope)
        {
            members.push(id);
        }
        Handle::new(id, tag, ownership.kind(), raw, site)
    }

    /// Applies the bookkeeping of a step and returns the native work it needs.
    fn commit(&mut self, id: HandleId, step: Step) -> Pending {
        let Some(slot) = self.slots.get(id) else {
            return Pending::Nothing;
        };
        let (tag, raw) = (slot.tag, slot.raw);
        let (pending, flags) = match step {
            Step::Destroy => (Pending::Destroy(tag, raw), HandleFlags::empty()),
            Step::Unreference => (Pending::Unreference(tag, raw), HandleFlags::empty()),
            Step::Decrement => (Pending::Decrement(tag, raw), HandleFlags::empty()),
            Step::Forget => (Pending::Nothing, HandleFlags::empty()),
            Step::Expire => (Pending::Nothing, HandleFlags::EXPIRED),
            _ => return Pending::Nothing,
        };
        self.slots.tombstone(id, flags);
        self.cycles.remove(&id);
        if step != Step::Expire {
            self.released += 1;
        }
        pending
    }
}

/// Authority for native handle lifetimes.
///
/// The registry is `Send + Sync`: host finalizers may release handles from
/// any thread.
pub struct HandleRegistry {
    runtime: Arc<dyn NativeRuntime>,
    config: RegistryConfig,
    state: Mutex<State>,
    next_wrapper: AtomicU64,
}

impl HandleRegistry {
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self::with_config(runtime, RegistryConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn NativeRuntime>, config: RegistryConfig) -> Self {
        Self {
            runtime,
            state: Mutex::new(State::new(config.initial_capacity)),
            config,
            next_wrapper: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.runtime
    }

    // ------------------------------------------------------------------
    // Wrap / Acquire
    // ------------------------------------------------------------------

    /// Registers raw words the native runtime returned for `tag`.
    ///
    /// No native call is made. A `SharedRefCounted` wrap adopts a reference
    /// the caller already holds; use [`acquire`](Self::acquire) to take a new one.
    #[track_caller]
    pub fn try_wrap(
        &self,
        raw: RawWords,
        tag: TypeTag,
        ownership: Ownership,
    ) -> Result<Handle, OwnershipDefect> {
        let site = Location::caller();
        let mut state = self.state.lock();
        state.check_binding(ownership).map_err(|kind| {
            kind.at(DefectSite {
                tag,
                handle: HandleId::NONE,
                allocated_at: site,
            })
        })?;
        let handle = state.insert(raw, tag, ownership, HandleFlags::empty(), site);
        drop(state);

        log::trace!("wrap {handle:?} as {ownership:?}");
        Ok(handle)
    }

    /// See [`try_wrap`](Self::try_wrap). A handle bound to a closed scope is
    /// registered already expired.
    #[track_caller]
    pub fn wrap(&self, raw: RawWords, tag: TypeTag, ownership: Ownership) -> Handle {
        match self.try_wrap(raw, tag, ownership) {
            Ok(handle) => handle,
            Err(defect) => {
                self.report(&defect);
                let flags = match defect.kind() {
                    DefectKind::ScopeClosed => HandleFlags::RELEASED | HandleFlags::EXPIRED,
                    _ => HandleFlags::empty(),
                };
                self.state
                    .lock()
                    .insert(raw, tag, ownership, flags, Location::caller())
            }
        }
    }

    /// Registers a handle newly returned from a native call. A
    /// `SharedRefCounted` acquire takes a native reference; an `Owned` one
    /// takes over the reference the call transferred.
    #[track_caller]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn try_acquire(
        &self,
        raw: RawWords,
        tag: TypeTag,
        ownership: Ownership,
    ) -> Result<Handle, OwnershipDefect> {
        let handle = self.try_wrap(raw, tag, ownership)?;
        if ownership.kind() == OwnershipKind::SharedRefCounted {
            self.runtime.reference(tag, &raw);
        }
        Ok(handle)
    }

    #[track_caller]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn acquire(&self, raw: RawWords, tag: TypeTag, ownership: Ownership) -> Handle {
        let handle = self.wrap(raw, tag, ownership);
        if ownership.kind() == OwnershipKind::SharedRefCounted {
            self.runtime.reference(tag, &raw);
        }
        handle
    }

    // ------------------------------------------------------------------
    // Borrow
    // ------------------------------------------------------------------

    /// Raw words for one call-frame slot. The ownership class is unchanged.
    pub fn try_borrow(&self, handle: &Handle) -> Result<RawWords, OwnershipDefect> {
        let state = self.state.lock();
        let flags = state.flags(handle).map_err(|kind| kind.at(site(handle)))?;
        match step(handle.kind(), flags, Operation::Borrow) {
            Step::Defect(kind) => Err(kind.at(site(handle))),
            _ => Ok(*handle.raw()),
        }
    }

    /// See [`try_borrow`](Self::try_borrow). A defective borrow yields null words.
    pub fn borrow(&self, handle: &Handle) -> RawWords {
        match self.try_borrow(handle) {
            Ok(raw) => raw,
            Err(defect) => {
                self.report(&defect);
                RawWords::null(handle.raw().len() as u8)
            }
        }
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Gives the handle's native reference back: destroys an Owned handle,
    /// unreferences a shared one. A cycle-marked Owned handle is only
    /// tombstoned; a cycle-marked shared one still drops its reference but
    /// is never destroyed from here.
    pub fn try_release(&self, handle: Handle) -> Result<(), OwnershipDefect> {
        let pending = {
            let mut state = self.state.lock();
            let flags = state.flags(&handle).map_err(|kind| kind.at(site(&handle)))?;
            match step(handle.kind(), flags, Operation::Release) {
                Step::Defect(kind) => return Err(kind.at(site(&handle))),
                next => state.commit(handle.id(), next),
            }
        };
        log::trace!("release {handle:?}: {pending:?}");
        self.run(pending);
        Ok(())
    }

    /// See [`try_release`](Self::try_release). Releasing a borrowed or
    /// lifetime-bound handle is a no-op guarded by a debug assertion.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn release(&self, handle: Handle) {
        if let Err(defect) = self.try_release(handle) {
            self.report(&defect);
        }
    }

    // ------------------------------------------------------------------
    // Transfer / MarkCycle
    // ------------------------------------------------------------------

    /// Moves the reference held by `handle` into a new handle; the source is
    /// invalidated. Reference counts are unchanged and lifetime-bound
    /// children follow the new handle.
    #[track_caller]
    pub fn try_transfer(&self, handle: Handle) -> Result<Handle, OwnershipDefect> {
        let site_now = Location::caller();
        let mut state = self.state.lock();
        let flags = state.flags(&handle).map_err(|kind| kind.at(site(&handle)))?;
        match step(handle.kind(), flags, Operation::Transfer) {
            Step::Move => {
                let id = handle.id();
                let ownership = state
                    .slots
                    .get(id)
                    .map_or(Ownership::Owned, |slot| slot.ownership);
                state.slots.tombstone(id, HandleFlags::MOVED);
                let moved = state.insert(
                    *handle.raw(),
                    handle.tag(),
                    ownership,
                    flags & HandleFlags::CYCLE,
                    site_now,
                );
                if let Some(partner) = state.cycles.remove(&id) {
                    state.cycles.insert(moved.id(), partner);
                }
                let children = state.slots.rebind_children(id, moved.id());
                drop(state);
                log::trace!(
                    "transfer {:?} -> {:?} ({children} children rebound)",
                    handle.id(),
                    moved.id()
                );
                Ok(moved)
            }
            Step::Defect(kind) => Err(kind.at(site(&handle))),
            other => unreachable!("transfer resolved to {other:?}"),
        }
    }

    /// See [`try_transfer`](Self::try_transfer). A defective transfer
    /// returns the source handle.
    #[track_caller]
    pub fn transfer(&self, handle: Handle) -> Handle {
        match self.try_transfer(handle) {
            Ok(moved) => moved,
            Err(defect) => {
                self.report(&defect);
                handle
            }
        }
    }

    /// Marks `handle` as part of a reference cycle with a host wrapper. From
    /// now on no release path runs its destructor; the native side's own
    /// collector reclaims it.
    pub fn try_mark_cycle(&self, handle: &Handle, partner: WrapperId) -> Result<(), OwnershipDefect> {
        let mut state = self.state.lock();
        let flags = state.flags(handle).map_err(|kind| kind.at(site(handle)))?;
        match step(handle.kind(), flags, Operation::MarkCycle) {
            Step::Mark => {
                if let Some(slot) = state.slots.get_mut(handle.id()) {
                    slot.flags |= HandleFlags::CYCLE;
                }
                state.cycles.insert(handle.id(), partner);
                drop(state);
                log::debug!("{handle:?} marked as cycle with {partner:?}");
                Ok(())
            }
            Step::Defect(kind) => Err(kind.at(site(handle))),
            other => unreachable!("mark cycle resolved to {other:?}"),
        }
    }

    pub fn mark_cycle(&self, handle: &Handle, partner: WrapperId) {
        if let Err(defect) = self.try_mark_cycle(handle, partner) {
            self.report(&defect);
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Host garbage collection of the wrapper holding `handle`. Releases a
    /// live Owned or shared handle exactly once and silently ignores a
    /// handle that was already released. Never traps.
    pub fn finalize(&self, handle: Handle) {
        let pending = {
            let mut state = self.state.lock();
            match state.flags(&handle) {
                Ok(flags) => {
                    let next = step(handle.kind(), flags, Operation::Finalize);
                    state.commit(handle.id(), next)
                }
                Err(_) => {
                    log::warn!("finalize of unknown {handle:?}");
                    Pending::Nothing
                }
            }
        };
        self.run(pending);
    }

    /// Wraps `handle` in a host-side reference that finalizes it on drop.
    pub fn host_ref(self: &Arc<Self>, handle: Handle) -> HostRef {
        let raw = self.next_wrapper.fetch_add(1, Ordering::Relaxed);
        let id = WrapperId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
        HostRef::new(Arc::clone(self), handle, id)
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Opens a lifetime scope. Borrowed handles bound to it expire and
    /// adopted handles are released when the returned arena closes.
    pub fn open_scope(&self) -> Arena<'_> {
        let scope = {
            let mut state = self.state.lock();
            let scope = ScopeId(state.next_scope);
            state.next_scope = state.next_scope.wrapping_add(1);
            state.scopes.insert(scope, Vec::new());
            scope
        };
        log::debug!("opened {scope}");
        Arena::new(self, scope)
    }

    pub fn is_scope_open(&self, scope: ScopeId) -> bool {
        self.state.lock().scopes.contains_key(&scope)
    }

    /// Registers an Owned handle that `scope` releases when it closes.
    pub(crate) fn adopt(
        &self,
        scope: ScopeId,
        raw: RawWords,
        tag: TypeTag,
        site_now: &'static Location<'static>,
    ) -> Result<Handle, OwnershipDefect> {
        let mut state = self.state.lock();
        if !state.scopes.contains_key(&scope) {
            return Err(DefectKind::ScopeClosed.at(DefectSite {
                tag,
                handle: HandleId::NONE,
                allocated_at: site_now,
            }));
        }
        let handle = state.insert(raw, tag, Ownership::Owned, HandleFlags::empty(), site_now);
        if let Some(members) = state.scopes.get_mut(&scope) {
            members.push(handle.id());
        }
        Ok(handle)
    }

    /// Bulk-releases a scope. Returns the number of native releases made.
    /// Closing a scope that is not open does nothing.
    pub(crate) fn close_scope(&self, scope: ScopeId) -> usize {
        let mut pending = Vec::new();
        let mut expired = 0usize;
        {
            let mut state = self.state.lock();
            let Some(members) = state.scopes.remove(&scope) else {
                return 0;
            };
            for id in members {
                let Some(slot) = state.slots.get(id) else {
                    continue;
                };
                let next = step(slot.ownership.kind(), slot.flags, Operation::Collect);
                if next == Step::Expire {
                    expired += 1;
                }
                match state.commit(id, next) {
                    Pending::Nothing => {}
                    work => pending.push(work),
                }
            }
        }
        let released = pending.len();
        for work in pending {
            self.run(work);
        }
        log::debug!("closed {scope}: {released} released, {expired} expired");
        released
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Ownership class of a live handle.
    pub fn ownership(&self, handle: &Handle) -> Option<Ownership> {
        self.state
            .lock()
            .slots
            .get(handle.id())
            .filter(|slot| !slot.is_dead())
            .map(|slot| slot.ownership)
    }

    pub fn is_live(&self, handle: &Handle) -> bool {
        self.state.lock().slots.is_live(handle.id())
    }

    /// The host wrapper a live handle is cycle-marked with.
    pub fn cycle_partner(&self, handle: &Handle) -> Option<WrapperId> {
        self.state.lock().cycles.get(&handle.id()).copied()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            live: state.slots.live(),
            released: state.released,
            tombstoned: state.slots.tombstoned(),
            scopes_open: state.scopes.len(),
        }
    }

    // ------------------------------------------------------------------

    fn run(&self, pending: Pending) {
        match pending {
            Pending::Nothing => {}
            Pending::Destroy(tag, raw) => self.runtime.destroy(tag, &raw),
            Pending::Unreference(tag, raw) => {
                if self.runtime.unreference(tag, &raw) {
                    self.runtime.destroy(tag, &raw);
                }
            }
            Pending::Decrement(tag, raw) => {
                if self.runtime.unreference(tag, &raw) {
                    log::debug!("cycle-marked {tag:?} reached zero; left to the native collector");
                }
            }
        }
    }

    #[track_caller]
    fn report(&self, defect: &OwnershipDefect) {
        if defect.kind() == DefectKind::ReleaseOfUnowned {
            log::warn!("{defect}");
            debug_assert!(false, "{defect}");
        } else {
            self.config.on_defect.report(defect);
        }
    }
}

fn site(handle: &Handle) -> DefectSite {
    DefectSite {
        tag: handle.tag(),
        handle: handle.id(),
        allocated_at: handle.site(),
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use enginelink_core::DefectPolicy;
    use enginelink_core::testing::CountingRuntime;

    use super::*;
    use crate::slot::TOMBSTONE_QUARANTINE;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn setup(policy: DefectPolicy) -> (Arc<CountingRuntime>, HandleRegistry) {
        init();
        let rt = Arc::new(CountingRuntime::new());
        let config = RegistryConfig::default().with_on_defect(policy);
        let registry = HandleRegistry::with_config(rt.clone(), config);
        (rt, registry)
    }

    #[test]
    fn owned_release_destroys_exactly_once() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        assert_eq!(rt.refcount(&raw), Some(1));

        registry.try_release(h).unwrap();
        assert_eq!(rt.destroy_count(&raw), 1);

        let err = registry.try_release(h).unwrap_err();
        assert_eq!(err.kind(), DefectKind::DoubleRelease);
        assert_eq!(err.site().tag, TypeTag::Object);
        assert_eq!(rt.destroy_count(&raw), 1);

        // Logged, not trapped, and still no second destroy.
        registry.release(h);
        assert_eq!(rt.destroy_count(&raw), 1);
        assert_eq!(rt.double_frees(), 0);
    }

    #[test]
    #[should_panic(expected = "double release of Object handle")]
    fn double_release_traps() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let h = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        registry.release(h);
        registry.release(h);
    }

    #[test]
    fn double_release_detected_after_slot_reuse() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        registry.release(h);

        for _ in 0..TOMBSTONE_QUARANTINE * 2 {
            let other = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
            registry.release(other);
        }

        assert_eq!(
            registry.try_release(h).unwrap_err().kind(),
            DefectKind::DoubleRelease
        );
        assert_eq!(rt.destroy_count(&raw), 1);
        assert_eq!(rt.double_frees(), 0);
    }

    #[test]
    fn shared_refcounts_balance() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Array);
        let before = rt.refcount(&raw);

        let h1 = registry.acquire(raw, TypeTag::Array, Ownership::SharedRefCounted);
        let h2 = registry.acquire(raw, TypeTag::Array, Ownership::SharedRefCounted);
        assert_eq!(rt.refcount(&raw), Some(3));
        assert_eq!(h1, h2);

        registry.release(h2);
        registry.release(h1);
        assert_eq!(rt.refcount(&raw), before);
        assert!(!rt.is_destroyed(&raw));
    }

    #[test]
    fn shared_last_reference_destroys() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Dictionary);
        // Adopts the reference the allocation created.
        let h = registry.wrap(raw, TypeTag::Dictionary, Ownership::SharedRefCounted);
        registry.release(h);
        assert_eq!(rt.destroy_count(&raw), 1);
        assert_eq!(rt.live(TypeTag::Dictionary), 0);
    }

    #[test]
    fn borrow_checks_tombstone() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        assert_eq!(registry.borrow(&h), raw);

        registry.release(h);
        assert_eq!(
            registry.try_borrow(&h).unwrap_err().kind(),
            DefectKind::UseAfterRelease
        );
        assert!(registry.borrow(&h).is_null());
    }

    #[test]
    fn release_of_borrowed_is_refused() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let arena = registry.open_scope();
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.wrap(raw, TypeTag::Object, Ownership::Borrowed(arena.scope()));
        assert_eq!(
            registry.try_release(h).unwrap_err().kind(),
            DefectKind::ReleaseOfUnowned
        );
        assert!(registry.is_live(&h));
        assert!(!rt.is_destroyed(&raw));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "release of unowned")]
    fn release_of_borrowed_asserts() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let arena = registry.open_scope();
        let h = registry.wrap(
            rt.alloc(TypeTag::Object),
            TypeTag::Object,
            Ownership::Borrowed(arena.scope()),
        );
        registry.release(h);
    }

    #[test]
    fn transfer_moves_the_reference() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        let moved = registry.transfer(h);

        assert_ne!(moved.id(), h.id());
        assert_eq!(moved.kind(), OwnershipKind::Owned);
        assert_eq!(
            registry.try_borrow(&h).unwrap_err().kind(),
            DefectKind::UseAfterMove
        );
        assert_eq!(
            registry.try_release(h).unwrap_err().kind(),
            DefectKind::UseAfterMove
        );
        assert!(!rt.is_destroyed(&raw));

        registry.release(moved);
        assert_eq!(rt.destroy_count(&raw), 1);
    }

    #[test]
    fn transfer_of_shared_keeps_count() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Array);
        let h = registry.acquire(raw, TypeTag::Array, Ownership::SharedRefCounted);
        let moved = registry.transfer(h);
        assert_eq!(rt.refcount(&raw), Some(2));
        assert_eq!(registry.ownership(&moved), Some(Ownership::SharedRefCounted));
        registry.release(moved);
        assert_eq!(rt.refcount(&raw), Some(1));
    }

    #[test]
    fn unowned_handles_are_not_transferable() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let parent = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        let child = registry.wrap(
            rt.alloc(TypeTag::Object),
            TypeTag::Object,
            Ownership::LifetimeBound(parent.id()),
        );
        assert_eq!(
            registry.try_transfer(child).unwrap_err().kind(),
            DefectKind::NotTransferable
        );
        assert_eq!(
            registry.try_mark_cycle(&child, WrapperId(NonZeroU64::MIN)).unwrap_err().kind(),
            DefectKind::CycleOnUnowned
        );
    }

    #[test]
    fn cycle_marked_handles_skip_the_destructor() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        let partner = WrapperId(NonZeroU64::new(7).unwrap());

        registry.mark_cycle(&h, partner);
        assert_eq!(registry.cycle_partner(&h), Some(partner));

        registry.release(h);
        assert!(!rt.is_destroyed(&raw));
        assert!(!registry.is_live(&h));
        assert_eq!(registry.cycle_partner(&h), None);

        assert_eq!(
            registry.try_release(h).unwrap_err().kind(),
            DefectKind::DoubleRelease
        );
        registry.finalize(h);
        assert!(!rt.is_destroyed(&raw));
    }

    #[test]
    fn cycle_mark_follows_transfer() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        let partner = WrapperId(NonZeroU64::MIN);
        registry.mark_cycle(&h, partner);

        let moved = registry.transfer(h);
        assert_eq!(registry.cycle_partner(&moved), Some(partner));
        registry.release(moved);
        assert!(!rt.is_destroyed(&raw));
    }

    #[test]
    fn cycle_marked_shared_still_drops_its_reference() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Array);
        let h = registry.acquire(raw, TypeTag::Array, Ownership::SharedRefCounted);
        assert_eq!(rt.refcount(&raw), Some(2));

        registry.mark_cycle(&h, WrapperId(NonZeroU64::MIN));
        registry.release(h);
        assert_eq!(rt.refcount(&raw), Some(1));
        assert!(!registry.is_live(&h));

        // The last reference reaching zero is left to the native side.
        let last = registry.wrap(raw, TypeTag::Array, Ownership::SharedRefCounted);
        registry.mark_cycle(&last, WrapperId(NonZeroU64::MIN));
        registry.finalize(last);
        assert_eq!(rt.refcount(&raw), Some(0));
        assert_eq!(rt.destroy_count(&raw), 0);
        assert_eq!(rt.double_frees(), 0);
    }

    #[test]
    fn lifetime_bound_children_follow_transfer() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let parent_raw = rt.alloc(TypeTag::Object);
        let parent = registry.acquire(parent_raw, TypeTag::Object, Ownership::Owned);
        let child_raw = rt.alloc(TypeTag::Object);
        let child = registry.wrap(child_raw, TypeTag::Object, Ownership::LifetimeBound(parent.id()));

        let moved = registry.transfer(parent);
        assert_eq!(registry.try_borrow(&child), Ok(child_raw));
        assert_eq!(
            registry.ownership(&child),
            Some(Ownership::LifetimeBound(moved.id()))
        );

        registry.release(moved);
        assert_eq!(
            registry.try_borrow(&child).unwrap_err().kind(),
            DefectKind::ParentReleased
        );
    }

    #[test]
    fn moved_handle_reported_after_slot_reuse() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let h = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        let moved = registry.transfer(h);

        let others: Vec<_> = (0..=TOMBSTONE_QUARANTINE)
            .map(|_| registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned))
            .collect();
        for other in others {
            registry.release(other);
        }
        let reused = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        assert_eq!(reused.id().index, h.id().index);

        assert_eq!(
            registry.try_release(h).unwrap_err().kind(),
            DefectKind::UseAfterMove
        );
        assert_eq!(
            registry.try_borrow(&h).unwrap_err().kind(),
            DefectKind::UseAfterMove
        );
        assert!(registry.is_live(&reused));
        assert!(registry.is_live(&moved));
    }

    #[test]
    fn lifetime_bound_dies_with_parent() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let parent = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        let child_raw = rt.alloc(TypeTag::Object);
        let child = registry.wrap(child_raw, TypeTag::Object, Ownership::LifetimeBound(parent.id()));
        assert_eq!(registry.borrow(&child), child_raw);

        registry.release(parent);
        assert_eq!(
            registry.try_borrow(&child).unwrap_err().kind(),
            DefectKind::ParentReleased
        );
        assert_eq!(
            registry
                .try_wrap(child_raw, TypeTag::Object, Ownership::LifetimeBound(parent.id()))
                .unwrap_err()
                .kind(),
            DefectKind::ParentReleased
        );

        // The child never owned anything.
        registry.finalize(child);
        assert!(!rt.is_destroyed(&child_raw));
    }

    #[test]
    fn handles_from_another_registry_are_stale() {
        let (rt, registry) = setup(DefectPolicy::Log);
        let (_, other) = setup(DefectPolicy::Log);
        let foreign = other.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        assert_eq!(
            registry.try_borrow(&foreign).unwrap_err().kind(),
            DefectKind::StaleHandle
        );
    }

    #[test]
    fn finalize_is_silent_after_release() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let raw = rt.alloc(TypeTag::Object);
        let h = registry.acquire(raw, TypeTag::Object, Ownership::Owned);
        registry.release(h);
        registry.finalize(h);
        assert_eq!(rt.destroy_count(&raw), 1);
    }

    #[test]
    fn stats_track_lifetimes() {
        let (rt, registry) = setup(DefectPolicy::Trap);
        let a = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        let b = registry.acquire(rt.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned);
        let arena = registry.open_scope();
        assert_eq!(
            registry.stats(),
            RegistryStats {
                live: 2,
                released: 0,
                tombstoned: 0,
                scopes_open: 1,
            }
        );
        registry.release(a);
        registry.release(b);
        drop(arena);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                live: 0,
                released: 2,
                tombstoned: 2,
                scopes_open: 0,
            }
        );
    }

    #[test]
    fn registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HandleRegistry>();
    }
}
