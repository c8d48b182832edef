//! Benchmarks for the hot attribute paths: name lookup, populated slot
//! reads, validated writes, and the equal-write short circuit.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lattice_core::{intern, Value};
use lattice_runtime::{ClassLayout, Instance, Member, ValidateMode};

fn build_layout(count: usize) -> std::rc::Rc<ClassLayout> {
    let members = (0..count)
        .map(|i| {
            let name = format!("member_{i}");
            let member = Member::new(&name);
            member
                .set_validate_mode(ValidateMode::Int { strict: false })
                .unwrap();
            (intern(&name), member)
        })
        .collect();
    ClassLayout::build("Bench", members).unwrap()
}

fn bench_index_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_lookup");
    for count in [4usize, 16, 64] {
        let layout = build_layout(count);
        let names: Vec<_> = (0..count).map(|i| intern(&format!("member_{i}"))).collect();
        group.bench_function(format!("hit_{count}"), |b| {
            let mut i = 0;
            b.iter(|| {
                let name = &names[i % names.len()];
                i += 1;
                black_box(layout.lookup(black_box(name)))
            })
        });
        let missing = intern("absent");
        group.bench_function(format!("miss_{count}"), |b| {
            b.iter(|| black_box(layout.lookup(black_box(&missing))))
        });
    }
    group.finish();
}

fn bench_populated_read(c: &mut Criterion) {
    let layout = build_layout(16);
    let instance = Instance::new(&layout);
    let name = intern("member_7");
    instance.set(&name, Value::Int(7)).unwrap();

    c.bench_function("populated_read", |b| {
        b.iter(|| black_box(instance.get(black_box(&name)).unwrap()))
    });
}

fn bench_validated_write(c: &mut Criterion) {
    let layout = build_layout(16);
    let instance = Instance::new(&layout);
    let name = intern("member_3");

    c.bench_function("validated_write_changing", |b| {
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            instance.set(black_box(&name), Value::Int(i)).unwrap()
        })
    });

    instance.set(&name, Value::Int(1)).unwrap();
    c.bench_function("validated_write_equal", |b| {
        b.iter(|| instance.set(black_box(&name), Value::Int(1)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_index_lookup,
    bench_populated_read,
    bench_validated_write
);
criterion_main!(benches);
