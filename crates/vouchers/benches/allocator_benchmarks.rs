use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use voucherflow_vouchers::{allocate, allocate_units, Inventory};

fn bench_single_unit(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_single_unit");

    // Best case hits the first candidate, worst case walks the whole table.
    let stocked = Inventory::from_counts([(1000, 100), (500, 100), (250, 100)]);
    let quarters_only = Inventory::from_counts([(1000, 0), (500, 0), (250, 100)]);

    for amount in [1000u32, 1500] {
        group.bench_with_input(BenchmarkId::new("first_candidate", amount), &amount, |b, &amount| {
            b.iter(|| allocate(black_box(amount), black_box(&stocked)))
        });
        group.bench_with_input(BenchmarkId::new("last_candidate", amount), &amount, |b, &amount| {
            b.iter(|| allocate(black_box(amount), black_box(&quarters_only)))
        });
    }

    group.finish();
}

fn bench_multi_unit(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_units");
    let inventory = Inventory::from_counts([(1000, 3), (500, 6), (250, 40)]);

    for units in [1u32, 4, 10] {
        group.throughput(Throughput::Elements(units as u64));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, &units| {
            b.iter(|| allocate_units(black_box(1000), units, black_box(&inventory)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_unit, bench_multi_unit);
criterion_main!(benches);
