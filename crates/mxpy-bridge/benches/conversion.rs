//! Conversion benchmarks for mxpy-bridge
//!
//! Compares the three ways a dense array crosses between hosts:
//! - zero-copy wrap (contiguous, at or above the wrap threshold)
//! - block copy (copy policy, or below the threshold)
//! - strided gather (non-contiguous object-host views)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mxpy_bridge::{
    release_pending_buffers, session, BridgeConfig, Converter, CopyPolicy, GilGuard, MxArray,
    NdArray, PyValue,
};

const SIDES: [usize; 3] = [32, 128, 512];

fn setup() -> GilGuard {
    session::initialize(BridgeConfig::default()).expect("session");
    GilGuard::acquire().expect("token")
}

// ============================================================================
// Array host to object host
// ============================================================================

fn bench_to_python(c: &mut Criterion) {
    let gil = setup();
    let wrap = Converter::from_session(&gil).expect("converter");
    let copy = wrap.with_policy(CopyPolicy::Copy);
    let mut group = c.benchmark_group("to_python");

    for side in SIDES {
        let n = side * side;
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("wrap", side), &side, |b, &side| {
            b.iter_with_setup(
                || MxArray::from_slice(&vec![1.0f64; side * side], &[side, side]).expect("array"),
                |array| black_box(wrap.to_python(&gil, &array).expect("convert")),
            );
            release_pending_buffers().expect("sweep");
        });

        let array = MxArray::from_slice(&vec![1.0f64; n], &[side, side]).expect("array");
        group.bench_with_input(BenchmarkId::new("copy", side), &array, |b, array| {
            b.iter(|| black_box(copy.to_python(&gil, array).expect("convert")))
        });
    }

    group.finish();
}

// ============================================================================
// Object host to array host
// ============================================================================

fn bench_to_mx(c: &mut Criterion) {
    let gil = setup();
    let wrap = Converter::from_session(&gil).expect("converter");
    let copy = wrap.with_policy(CopyPolicy::Copy);
    let mut group = c.benchmark_group("to_mx");

    for side in SIDES {
        let n = side * side;
        group.throughput(Throughput::Elements(n as u64));
        let data: Vec<f64> = (0..n).map(|i| i as f64).collect();

        group.bench_with_input(BenchmarkId::new("wrap", side), &data, |b, data| {
            b.iter_with_setup(
                || NdArray::from_vec_fortran(data.clone(), vec![side, side]).expect("ndarray"),
                |nd| black_box(wrap.to_mx(&gil, &PyValue::Array(nd)).expect("convert")),
            );
            release_pending_buffers().expect("sweep");
        });

        let contiguous = PyValue::Array(NdArray::from_vec(data.clone(), vec![side, side]).expect("ndarray"));
        group.bench_with_input(BenchmarkId::new("copy", side), &contiguous, |b, value| {
            b.iter(|| black_box(copy.to_mx(&gil, value).expect("convert")))
        });

        let nd = NdArray::from_vec(data.clone(), vec![side, side]).expect("ndarray");
        let strided = PyValue::Array(nd.step(1, 2).expect("view"));
        group.bench_with_input(BenchmarkId::new("strided", side), &strided, |b, value| {
            b.iter(|| black_box(wrap.to_mx(&gil, value).expect("convert")))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_to_python, bench_to_mx);
criterion_main!(benches);
