//! Benchmarks for filament-core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use filament_core::{list, record, wrap, Observer, Value, WrapOptions};

fn bench_wrap(c: &mut Criterion) {
    c.bench_function("wrap_record", |b| {
        b.iter(|| {
            let rec = record! { "a" => 1i64, "b" => "two", "c" => 3.0f64 };
            black_box(wrap(Value::Record(rec), WrapOptions::new()).unwrap())
        })
    });
}

fn bench_rewrap_existing(c: &mut Criterion) {
    let rec = record! { "a" => 1i64 };
    let _handle = wrap(Value::Record(rec.clone()), WrapOptions::new()).unwrap();
    c.bench_function("rewrap_existing", |b| {
        b.iter(|| black_box(wrap(Value::Record(rec.clone()), WrapOptions::new()).unwrap()))
    });
}

fn bench_get(c: &mut Criterion) {
    let handle = wrap(Value::Record(record! { "k" => 42i64 }), WrapOptions::new()).unwrap();
    c.bench_function("get_untracked", |b| {
        b.iter(|| black_box(handle.get("k")))
    });
}

fn bench_get_tracked(c: &mut Criterion) {
    let handle = wrap(Value::Record(record! { "k" => 42i64 }), WrapOptions::new()).unwrap();
    let observer = Observer::new(|_| {});
    c.bench_function("get_tracked", |b| {
        b.iter(|| observer.run(|| black_box(handle.get("k"))))
    });
}

fn bench_set(c: &mut Criterion) {
    let handle = wrap(Value::Record(record! { "k" => 0i64 }), WrapOptions::new()).unwrap();
    c.bench_function("set", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            handle.set("k", black_box(n)).unwrap()
        })
    });
}

fn bench_set_same_value(c: &mut Criterion) {
    let handle = wrap(Value::Record(record! { "k" => 42i64 }), WrapOptions::new()).unwrap();
    c.bench_function("set_same_value", |b| {
        b.iter(|| handle.set("k", black_box(42i64)).unwrap())
    });
}

fn bench_push_with_observer(c: &mut Criterion) {
    let handle = wrap(Value::List(list![]), WrapOptions::new()).unwrap();
    let observer = Observer::new(|_| {});
    observer.run(|| handle.len());
    c.bench_function("push_observed", |b| {
        b.iter(|| handle.push(black_box(1i64)).unwrap())
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let handle = wrap(
        Value::Record(record! {
            "items" => list![1i64, 2i64, 3i64, 4i64, 5i64],
            "meta" => record! { "name" => "bench", "ok" => true },
        }),
        WrapOptions::new(),
    )
    .unwrap();
    c.bench_function("snapshot", |b| b.iter(|| black_box(handle.snapshot())));
}

criterion_group!(
    benches,
    bench_wrap,
    bench_rewrap_existing,
    bench_get,
    bench_get_tracked,
    bench_set,
    bench_set_same_value,
    bench_push_with_observer,
    bench_snapshot,
);
criterion_main!(benches);
