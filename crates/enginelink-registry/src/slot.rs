//! Generational slot storage with tombstones.

use std::collections::VecDeque;
use std::panic::Location;

use enginelink_core::{HandleFlags, HandleId, Ownership, RawWords, TypeTag};

/// Released slots are held back from reuse until this many tombstones have
/// accumulated, so a stale handle usually still finds its own tombstone and
/// the defect is reported precisely.
pub(crate) const TOMBSTONE_QUARANTINE: usize = 64;

/// Parent chains are walked at most this deep; ancestors beyond it are
/// assumed alive.
const MAX_PARENT_DEPTH: usize = 32;

pub(crate) struct Slot {
    pub generation: u32,
    pub tag: TypeTag,
    pub ownership: Ownership,
    pub flags: HandleFlags,
    /// Tombstone flags of the previous generation.
    pub retired: HandleFlags,
    pub raw: RawWords,
    pub site: &'static Location<'static>,
}

impl Slot {
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(HandleFlags::RELEASED)
    }
}

#[derive(Default)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    live: usize,
}

impl SlotTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: VecDeque::new(),
            live: 0,
        }
    }

    pub fn insert(
        &mut self,
        tag: TypeTag,
        ownership: Ownership,
        raw: RawWords,
        flags: HandleFlags,
        site: &'static Location<'static>,
    ) -> HandleId {
        let dead = flags.contains(HandleFlags::RELEASED);
        let id = if self.free.len() > TOMBSTONE_QUARANTINE
            && let Some(index) = self.free.pop_front()
        {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.retired = slot.flags;
            slot.tag = tag;
            slot.ownership = ownership;
            slot.flags = flags;
            slot.raw = raw;
            slot.site = site;
            HandleId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                tag,
                ownership,
                flags,
                retired: HandleFlags::empty(),
                raw,
                site,
            });
            HandleId::new(index, 0)
        };
        if dead {
            self.free.push_back(id.index);
        } else {
            self.live += 1;
        }
        id
    }

    /// True if `id` was issued by this table, even if its slot has since
    /// been handed to a newer handle.
    pub fn issued(&self, id: HandleId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| id.generation <= slot.generation)
    }

    /// Tombstone flags of `id` if its slot was reused exactly once since.
    /// Older generations have lost their flags.
    pub fn retired(&self, id: HandleId) -> Option<HandleFlags> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| id.generation.wrapping_add(1) == slot.generation)
            .map(|slot| slot.retired)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: HandleId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    /// True if `id` names a slot that is still alive.
    pub fn is_live(&self, id: HandleId) -> bool {
        self.get(id).is_some_and(|slot| !slot.is_dead())
    }

    /// True if a lifetime-bound slot has lost any ancestor.
    pub fn is_orphaned(&self, slot: &Slot) -> bool {
        let mut ownership = slot.ownership;
        for _ in 0..MAX_PARENT_DEPTH {
            let Ownership::LifetimeBound(parent) = ownership else {
                return false;
            };
            match self.get(parent) {
                Some(parent) if !parent.is_dead() => ownership = parent.ownership,
                _ => return true,
            }
        }
        false
    }

    /// Points every live child bound to `from` at `to`. Returns the number
    /// of children moved.
    pub fn rebind_children(&mut self, from: HandleId, to: HandleId) -> usize {
        let mut moved = 0;
        for slot in self.slots.iter_mut().filter(|slot| !slot.is_dead()) {
            if slot.ownership == Ownership::LifetimeBound(from) {
                slot.ownership = Ownership::LifetimeBound(to);
                moved += 1;
            }
        }
        moved
    }

    /// Marks a live slot dead and queues it for reuse.
    pub fn tombstone(&mut self, id: HandleId, flags: HandleFlags) {
        if let Some(slot) = self.slots.get_mut(id.index as usize)
            && slot.generation == id.generation
            && !slot.is_dead()
        {
            slot.flags |= HandleFlags::RELEASED | flags;
            self.free.push_back(id.index);
            self.live -= 1;
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn tombstoned(&self) -> usize {
        self.free.len()
    }
}
