//! A fake engine for integration tests.
//!
//! Native entry points are `extern "C"` functions, so the fake engine state
//! they touch lives in thread locals. Every test runs on its own thread and
//! gets its own engine.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::ptr;
use std::sync::Arc;

use enginelink::prelude::*;
use enginelink_core::testing::CountingRuntime;
use enginelink_core::variant::{Payload, decode};

thread_local! {
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::default());
}

#[derive(Default)]
struct Engine {
    runtime: Option<Arc<CountingRuntime>>,
    names: HashMap<usize, String>,
    parents: HashMap<usize, usize>,
    children: HashMap<usize, usize>,
    shared: usize,
}

fn runtime() -> Arc<CountingRuntime> {
    ENGINE.with(|engine| engine.borrow().runtime.clone().expect("engine not installed"))
}

pub const NODE: &str = "Node";

pub fn set_name_id() -> FunctionId {
    FunctionId::method(NODE, "set_name", 1)
}
pub fn get_name_id() -> FunctionId {
    FunctionId::method(NODE, "get_name", 1)
}
pub fn new_node_id() -> FunctionId {
    FunctionId::constructor(NODE, 0)
}
pub fn add_child_id() -> FunctionId {
    FunctionId::method(NODE, "add_child", 1)
}
pub fn get_parent_id() -> FunctionId {
    FunctionId::method(NODE, "get_parent", 1)
}
pub fn get_child_id() -> FunctionId {
    FunctionId::method(NODE, "get_child", 1)
}
pub fn get_resource_id() -> FunctionId {
    FunctionId::method(NODE, "get_resource", 1)
}
pub fn sum_id() -> FunctionId {
    FunctionId::utility("sum", 1)
}
pub fn label_len_id() -> FunctionId {
    FunctionId::utility("label_len", 1)
}
pub fn echo_variant_id() -> FunctionId {
    FunctionId::utility("echo_variant", 1)
}

/// A marshaller wired to a fresh fake engine.
pub struct Harness {
    pub runtime: Arc<CountingRuntime>,
    pub marshaller: Marshaller,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(DefectPolicy::Trap)
    }

    pub fn with_policy(policy: DefectPolicy) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let runtime = Arc::new(CountingRuntime::new());
        ENGINE.with(|engine| {
            *engine.borrow_mut() = Engine {
                runtime: Some(runtime.clone()),
                ..Engine::default()
            }
        });

        let registry = Arc::new(HandleRegistry::with_config(
            runtime.clone(),
            RegistryConfig::default().with_on_defect(policy),
        ));
        let config = MarshalConfig::default()
            .with_on_defect(policy)
            .with_verify_kinds(true);
        Self {
            runtime,
            marshaller: Marshaller::with_config(registry, functions(), config),
        }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        self.marshaller.registry()
    }

    /// Resolves a registered fake by id.
    pub fn spec(&self, id: FunctionId, ret: ReturnSpec) -> CallSpec {
        let shape = self
            .marshaller
            .functions()
            .shape_of(id)
            .unwrap_or_else(|| panic!("{id} is not registered"));
        self.marshaller
            .resolve(id, shape, ret)
            .unwrap_or_else(|e| panic!("resolve {id}: {e}"))
    }

    /// A spec for a fake that is not in the function table.
    pub fn adhoc(&self, call: NativeCall, args: &[SlotKind], ret: ReturnSpec) -> CallSpec {
        CallSpec::from_args(call, args, ret).expect("too many arguments")
    }

    /// A native node owned by the host.
    pub fn node(&self) -> Handle {
        let raw = self.runtime.alloc(TypeTag::Object);
        self.registry().acquire(raw, TypeTag::Object, Ownership::Owned)
    }

    pub fn name_of(&self, node: &Handle) -> Option<String> {
        ENGINE.with(|engine| engine.borrow().names.get(&node.raw().first()).cloned())
    }

    /// Makes the engine report `parent` as the parent of `child`.
    pub fn set_parent(&self, child: &Handle, parent: &Handle) {
        ENGINE.with(|engine| {
            engine
                .borrow_mut()
                .parents
                .insert(child.raw().first(), parent.raw().first())
        });
    }

    /// A shared resource the engine hands out from `get_resource`.
    pub fn install_resource(&self) -> RawWords {
        let raw = self.runtime.alloc(TypeTag::Array);
        ENGINE.with(|engine| engine.borrow_mut().shared = raw.first());
        raw
    }
}

fn functions() -> FunctionTable {
    use SlotKind::*;

    let mut table = FunctionTable::new();
    let mut add = |id: FunctionId, call: NativeCall, ret: SlotKind, args: &[SlotKind]| {
        let shape = Shape::new(ret, args).expect("shape");
        table.register(id, call, shape).expect("register");
    };
    add(set_name_id(), node_set_name, Void, &[Word1]);
    add(get_name_id(), node_get_name, Word1, &[]);
    add(new_node_id(), node_new, Word1, &[]);
    add(add_child_id(), node_add_child, Void, &[Word1]);
    add(get_parent_id(), node_get_parent, Word1, &[]);
    add(get_child_id(), node_get_child, Word1, &[]);
    add(get_resource_id(), node_get_resource, Word1, &[]);
    add(sum_id(), sum, Float64, &[Int64, Float64, Int32]);
    add(label_len_id(), label_len, Int64, &[Word1]);
    add(echo_variant_id(), identity::<[usize; 3]>, Word3, &[Word3]);
    table
}

// ----------------------------------------------------------------------
// Native entry points
// ----------------------------------------------------------------------

unsafe fn arg<T: Copy>(args: *const *const c_void, index: usize) -> T {
    unsafe { ptr::read((*args.add(index)).cast::<T>()) }
}

unsafe fn ret<T>(ret: *mut c_void, value: T) {
    unsafe { ptr::write(ret.cast::<T>(), value) }
}

/// Copies argument 0 into the return slot.
pub unsafe extern "C" fn identity<T: Copy>(
    _base: *mut c_void,
    args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    unsafe { ret(out, arg::<T>(args, 0)) }
}

/// Native error code for an argument of the wrong type.
pub const CALL_ERROR_INVALID_ARGUMENT: i32 = 2;

/// Vararg method summing its `Int` variant arguments into an `Int` variant.
/// A non-`Int` argument fails the call and leaves the return untouched.
pub unsafe extern "C" fn variant_sum(
    _base: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    out: *mut c_void,
    error: *mut CallError,
) {
    let mut total = 0i64;
    for index in 0..argc as usize {
        let words = unsafe { arg::<[usize; 3]>(args, index) };
        match decode(&words) {
            Ok(Payload::Value(Variant::Int(value))) => total += value,
            _ => {
                let failed = CallError {
                    error: CALL_ERROR_INVALID_ARGUMENT,
                    argument: index as i32,
                    expected: i32::from(u8::from(TypeTag::Int)),
                };
                unsafe { ptr::write(error, failed) };
                return;
            }
        }
    }
    let words = Variant::Int(total).encode_value().unwrap_or_default();
    unsafe { ret(out, words) }
}

/// Stores a copy of the string argument as the node's name.
unsafe extern "C" fn node_set_name(
    base: *mut c_void,
    args: *const *const c_void,
    _out: *mut c_void,
    _argc: i64,
) {
    let string = unsafe { arg::<usize>(args, 0) };
    let text = runtime().string(&RawWords::one(string)).unwrap_or_default();
    ENGINE.with(|engine| engine.borrow_mut().names.insert(base as usize, text));
}

/// Returns a new native string with the node's name.
unsafe extern "C" fn node_get_name(
    base: *mut c_void,
    _args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let name = ENGINE.with(|engine| engine.borrow().names.get(&(base as usize)).cloned());
    let raw = runtime().new_string(&name.unwrap_or_default());
    unsafe { ret(out, raw.first()) }
}

unsafe extern "C" fn node_new(
    _base: *mut c_void,
    _args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let raw = runtime().alloc(TypeTag::Object);
    unsafe { ret(out, raw.first()) }
}

unsafe extern "C" fn node_add_child(
    base: *mut c_void,
    args: *const *const c_void,
    _out: *mut c_void,
    _argc: i64,
) {
    let child = unsafe { arg::<usize>(args, 0) };
    ENGINE.with(|engine| {
        let mut engine = engine.borrow_mut();
        engine.children.insert(base as usize, child);
        engine.parents.insert(child, base as usize);
    });
}

unsafe extern "C" fn node_get_parent(
    base: *mut c_void,
    _args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let parent = ENGINE.with(|engine| engine.borrow().parents.get(&(base as usize)).copied());
    unsafe { ret(out, parent.unwrap_or(0)) }
}

unsafe extern "C" fn node_get_child(
    base: *mut c_void,
    _args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let child = ENGINE.with(|engine| engine.borrow().children.get(&(base as usize)).copied());
    unsafe { ret(out, child.unwrap_or(0)) }
}

unsafe extern "C" fn node_get_resource(
    _base: *mut c_void,
    _args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let shared = ENGINE.with(|engine| engine.borrow().shared);
    unsafe { ret(out, shared) }
}

unsafe extern "C" fn sum(
    _base: *mut c_void,
    args: *const *const c_void,
    out: *mut c_void,
    argc: i64,
) {
    if argc != 3 {
        return;
    }
    let total = unsafe {
        arg::<i64>(args, 0) as f64 + arg::<f64>(args, 1) + f64::from(arg::<i32>(args, 2))
    };
    unsafe { ret(out, total) }
}

unsafe extern "C" fn label_len(
    _base: *mut c_void,
    args: *const *const c_void,
    out: *mut c_void,
    _argc: i64,
) {
    let text = unsafe { CStr::from_ptr(arg::<*const c_char>(args, 0)) };
    unsafe { ret(out, text.to_bytes().len() as i64) }
}
