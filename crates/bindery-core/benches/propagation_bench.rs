//! Benchmarks for change propagation and snapshot serialization.
//!
//! Run with: `cargo bench --package bindery-core --bench propagation_bench`
//!
//! # Performance Baselines
//!
//! These benchmarks establish baselines for:
//! - Fan-out of one source property to many bound targets
//! - Change propagation down a chain of intermediate objects
//! - Serializing and restoring an object with bindings

use std::hint::black_box;
use std::rc::Rc;

use bindery_core::serialize::{self, SerializeContext};
use bindery_core::{
    Binding, BindingOptions, ObjectRef, ObjectStore, PropertyDescriptor, Runtime, RuntimeConfig,
    TypeDeclaration, TypeToken, path,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

// ============================================================================
// Fixtures
// ============================================================================

fn runtime() -> (Rc<Runtime>, Rc<ObjectStore>) {
    let rt = Runtime::new(RuntimeConfig::default());
    let store = rt.install_store();
    TypeDeclaration::new("Node")
        .property(PropertyDescriptor::new("next", TypeToken::Any))
        .property(PropertyDescriptor::new("count", TypeToken::Number).default_value(0))
        .property(PropertyDescriptor::new("label", TypeToken::String).default_value(""))
        .declare(&rt)
        .unwrap_or_else(|err| panic!("declare Node: {err}"));
    (rt, store)
}

fn node(rt: &Rc<Runtime>, store: &ObjectStore) -> ObjectRef {
    let object = rt
        .create("Node")
        .unwrap_or_else(|err| panic!("create Node: {err}"));
    store.insert(&object);
    object
}

// ============================================================================
// Propagation
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for targets in [1, 16, 256] {
        let (rt, store) = runtime();
        let source = node(&rt, &store);
        let sinks: Vec<ObjectRef> = (0..targets)
            .map(|_| {
                let sink = node(&rt, &store);
                let binding =
                    Binding::element(&rt, &source, path(["count"]), BindingOptions::new());
                sink.bind("label", &binding)
                    .unwrap_or_else(|err| panic!("bind: {err}"));
                sink
            })
            .collect();

        let mut n = 0.0;
        group.bench_with_input(BenchmarkId::new("set", targets), &source, |b, source| {
            b.iter(|| {
                n += 1.0;
                source.set("count", black_box(n)).ok();
            });
        });
        black_box(&sinks);
    }

    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [1usize, 4, 16] {
        let (rt, store) = runtime();
        let nodes: Vec<ObjectRef> = (0..=depth).map(|_| node(&rt, &store)).collect();
        for pair in nodes.windows(2) {
            pair[0].set("next", &pair[1]).ok();
        }
        let mut segments = vec!["next"; depth];
        segments.push("count");
        let sink = node(&rt, &store);
        sink.bind(
            "count",
            &Binding::element(&rt, &nodes[0], path(segments), BindingOptions::new()),
        )
        .unwrap_or_else(|err| panic!("bind: {err}"));

        let leaf = Rc::clone(&nodes[depth]);
        let mut n = 0.0;
        group.bench_with_input(BenchmarkId::new("leaf_set", depth), &leaf, |b, leaf| {
            b.iter(|| {
                n += 1.0;
                leaf.set("count", black_box(n)).ok();
            });
        });
    }

    group.finish();
}

// ============================================================================
// Serialization
// ============================================================================

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    let (rt, store) = runtime();
    let source = node(&rt, &store);
    let object = node(&rt, &store);
    object.set("count", 7).ok();
    object
        .bind(
            "label",
            &Binding::element(&rt, &source, path(["label"]), BindingOptions::new()),
        )
        .unwrap_or_else(|err| panic!("bind: {err}"));

    group.bench_function("serialize", |b| {
        b.iter(|| serialize::serialize(black_box(&object), &SerializeContext::new()));
    });

    let json = serialize::serialize(&object, &SerializeContext::new())
        .unwrap_or_else(|err| panic!("serialize: {err}"));
    group.bench_function("deserialize_new_instance", |b| {
        b.iter(|| {
            serialize::deserialize(
                &rt,
                black_box(json.clone()),
                SerializeContext::new().new_instance(),
            )
        });
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_fan_out, bench_chain, bench_snapshot);

criterion_main!(benches);
