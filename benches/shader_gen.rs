//! Benchmarks for shader generation and CPU-side layout work.
//!
//! Run with: `cargo bench --bench shader_gen`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec2;

use starfield::shaders::{compute_shader, render_shader};
use starfield::{layout, GeometryView, Kernel, ParticleRecord, Population, Preset, WorkGroupSize};

fn bench_kernel_to_wgsl(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_to_wgsl");

    group.bench_function("integrate", |b| {
        let kernel = Kernel::Integrate;
        b.iter(|| black_box(kernel.to_wgsl()))
    });

    group.bench_function("gravity", |b| {
        let kernel = Kernel::gravity();
        b.iter(|| black_box(kernel.to_wgsl()))
    });

    group.bench_function("custom", |b| {
        let kernel = Kernel::Wgsl("p.color.a *= 0.99;".into());
        b.iter(|| black_box(kernel.to_wgsl()))
    });

    group.finish();
}

fn bench_full_shaders(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_shader");

    group.bench_function("compute_gravity", |b| {
        let kernel = Kernel::gravity();
        b.iter(|| black_box(compute_shader(&kernel, WorkGroupSize::DEFAULT)))
    });

    group.bench_function("render", |b| {
        let view = GeometryView::of::<ParticleRecord>();
        b.iter(|| black_box(render_shader(&view)))
    });

    group.finish();
}

fn bench_population(c: &mut Criterion) {
    let mut group = c.benchmark_group("population");
    let extent = Vec2::new(2300.0, 1300.0);

    for count in [1_000u32, 60_000] {
        group.bench_with_input(BenchmarkId::new("galaxies_scalars", count), &count, |b, &count| {
            let population = Population::preset(Preset::CollidingGalaxies, count, extent, 1);
            b.iter(|| black_box(population.scalars()))
        });

        group.bench_with_input(BenchmarkId::new("seed_records", count), &count, |b, &count| {
            let scalars = Population::preset(Preset::RandomSpace, count, extent, 1).scalars();
            b.iter(|| black_box(layout::seed_records(&scalars, count).map(|r| r.len())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernel_to_wgsl, bench_full_shaders, bench_population);
criterion_main!(benches);
