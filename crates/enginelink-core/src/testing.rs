//! A fake native runtime for tests.
//!
//! [`CountingRuntime`] hands out unique fake addresses and records every
//! lifetime call made against them, so tests can assert that destructors ran
//! exactly once and reference counts stayed balanced.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::handle::RawWords;
use crate::runtime::NativeRuntime;
use crate::tag::TypeTag;

#[derive(Debug, Clone)]
struct Resource {
    tag: TypeTag,
    refcount: u32,
    destroyed: u32,
    text: Option<String>,
}

/// Native runtime double that counts allocations, references and destroys.
#[derive(Debug)]
pub struct CountingRuntime {
    next_address: AtomicUsize,
    resources: Mutex<FxHashMap<usize, Resource>>,
    double_frees: AtomicUsize,
}

impl Default for CountingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingRuntime {
    pub fn new() -> Self {
        Self {
            next_address: AtomicUsize::new(0x1000),
            resources: Mutex::new(FxHashMap::default()),
            double_frees: AtomicUsize::new(0),
        }
    }

    /// Creates a native resource with a reference count of one.
    pub fn alloc(&self, tag: TypeTag) -> RawWords {
        self.alloc_with(tag, None)
    }

    fn alloc_with(&self, tag: TypeTag, text: Option<String>) -> RawWords {
        let address = self.next_address.fetch_add(0x10, Ordering::Relaxed);
        self.resources.lock().insert(
            address,
            Resource {
                tag,
                refcount: 1,
                destroyed: 0,
                text,
            },
        );
        match tag.handle_width() {
            Some(2) => RawWords::two(address, 0),
            _ => RawWords::one(address),
        }
    }

    /// Live resources of a type (allocated and not destroyed).
    pub fn live(&self, tag: TypeTag) -> usize {
        self.resources
            .lock()
            .values()
            .filter(|r| r.tag == tag && r.destroyed == 0)
            .count()
    }

    /// Current native reference count, `None` for unknown addresses.
    pub fn refcount(&self, raw: &RawWords) -> Option<u32> {
        self.resources.lock().get(&raw.first()).map(|r| r.refcount)
    }

    /// How many times the destructor ran for this resource.
    pub fn destroy_count(&self, raw: &RawWords) -> u32 {
        self.resources
            .lock()
            .get(&raw.first())
            .map_or(0, |r| r.destroyed)
    }

    pub fn is_destroyed(&self, raw: &RawWords) -> bool {
        self.destroy_count(raw) > 0
    }

    /// Text of a string created through [`NativeRuntime::new_string`], if it
    /// has not been destroyed.
    pub fn string(&self, raw: &RawWords) -> Option<String> {
        self.resources
            .lock()
            .get(&raw.first())
            .filter(|r| r.destroyed == 0)
            .and_then(|r| r.text.clone())
    }

    /// Destroys or unreferences of resources that were already destroyed.
    pub fn double_frees(&self) -> usize {
        self.double_frees.load(Ordering::Relaxed)
    }
}

impl NativeRuntime for CountingRuntime {
    fn destroy(&self, tag: TypeTag, raw: &RawWords) {
        let mut resources = self.resources.lock();
        match resources.get_mut(&raw.first()) {
            Some(resource) => {
                debug_assert_eq!(resource.tag, tag);
                if resource.destroyed > 0 {
                    self.double_frees.fetch_add(1, Ordering::Relaxed);
                }
                resource.destroyed += 1;
                resource.refcount = 0;
            }
            None => {
                self.double_frees.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn reference(&self, _tag: TypeTag, raw: &RawWords) {
        if let Some(resource) = self.resources.lock().get_mut(&raw.first()) {
            resource.refcount += 1;
        }
    }

    fn unreference(&self, _tag: TypeTag, raw: &RawWords) -> bool {
        let mut resources = self.resources.lock();
        match resources.get_mut(&raw.first()) {
            Some(resource) if resource.destroyed == 0 && resource.refcount > 0 => {
                resource.refcount -= 1;
                resource.refcount == 0
            }
            _ => {
                self.double_frees.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn new_string(&self, text: &str) -> RawWords {
        self.alloc_with(TypeTag::String, Some(text.to_owned()))
    }
}
