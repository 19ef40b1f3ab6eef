//! Benchmarks for the per-call marshalling path.
//!
//! - `primitive_call`: the common case of a few plain arguments, no handles
//! - `string_argument`: a transient native string created and released per call
//! - `factory_release`: an Owned return registered and released
//! - `registry_borrow`: lookup cost of borrowing a live handle
//!
//! ```bash
//! cargo bench --bench frame_benchmarks
//! ```

use std::ffi::c_void;
use std::hint::black_box;
use std::ptr;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use enginelink::prelude::*;
use enginelink_core::testing::CountingRuntime;

unsafe extern "C" fn add(
    _base: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
    _argc: i64,
) {
    unsafe {
        let a = ptr::read((*args).cast::<i64>());
        let b = ptr::read((*args.add(1)).cast::<f64>());
        ptr::write(ret.cast::<f64>(), a as f64 + b);
    }
}

unsafe extern "C" fn noop(_: *mut c_void, _: *const *const c_void, _: *mut c_void, _: i64) {}

/// Returns the word passed as argument 0, standing in for a factory.
unsafe extern "C" fn echo_word(
    _base: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
    _argc: i64,
) {
    unsafe { ptr::write(ret.cast::<usize>(), ptr::read((*args).cast::<usize>())) }
}

fn setup() -> (Arc<CountingRuntime>, Marshaller) {
    let runtime = Arc::new(CountingRuntime::new());
    let registry = Arc::new(HandleRegistry::with_config(
        runtime.clone(),
        RegistryConfig::default().with_on_defect(DefectPolicy::Log),
    ));
    let config = MarshalConfig::default()
        .with_on_defect(DefectPolicy::Log)
        .with_verify_kinds(false);
    (runtime, Marshaller::with_config(registry, FunctionTable::new(), config))
}

fn bench_primitive_call(c: &mut Criterion) {
    let (_, marshaller) = setup();
    let spec = CallSpec::from_args(
        add,
        &[SlotKind::Int64, SlotKind::Float64],
        ReturnSpec::Value(SlotKind::Float64),
    )
    .unwrap();

    c.bench_function("primitive_call", |b| {
        b.iter(|| {
            let mut frame = marshaller.begin_call(&spec);
            frame.put(0, black_box(40i64)).put(1, black_box(2.5f64)).invoke();
            black_box(frame.read::<f64>())
        })
    });
}

fn bench_string_argument(c: &mut Criterion) {
    let (_, marshaller) = setup();
    let spec = CallSpec::from_args(noop, &[SlotKind::Word1], ReturnSpec::Void).unwrap();

    let mut group = c.benchmark_group("string_argument");
    for len in [8usize, 256] {
        let text = "x".repeat(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &text, |b, text| {
            b.iter(|| {
                let mut frame = marshaller.begin_call(&spec);
                frame.put_str(0, text).invoke();
                frame.end()
            })
        });
    }
    group.finish();
}

fn bench_factory_release(c: &mut Criterion) {
    let (runtime, marshaller) = setup();
    let spec = CallSpec::from_args(
        echo_word,
        &[SlotKind::Int64],
        ReturnSpec::Handle {
            tag: TypeTag::Object,
            contract: OwnershipKind::Owned,
        },
    )
    .unwrap();

    c.bench_function("factory_release", |b| {
        b.iter(|| {
            let raw = runtime.alloc(TypeTag::Object);
            let mut frame = marshaller.begin_call(&spec);
            frame.put(0, raw.first() as u64).invoke();
            let handle = frame.read_handle();
            frame.end();
            if let Some(handle) = handle {
                marshaller.registry().release(handle);
            }
        })
    });
}

fn bench_registry_borrow(c: &mut Criterion) {
    let (runtime, marshaller) = setup();
    let registry = marshaller.registry();
    let handles: Vec<_> = (0..1024)
        .map(|_| registry.acquire(runtime.alloc(TypeTag::Object), TypeTag::Object, Ownership::Owned))
        .collect();

    let mut group = c.benchmark_group("registry_borrow");
    group.throughput(Throughput::Elements(handles.len() as u64));
    group.bench_function("1024_live", |b| {
        b.iter(|| {
            for handle in &handles {
                black_box(registry.borrow(handle));
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_primitive_call,
    bench_string_argument,
    bench_factory_release,
    bench_registry_borrow
);
criterion_main!(benches);
