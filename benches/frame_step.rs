//! Benchmarks for one scheduler step on the host reference device.
//!
//! Run with: `cargo bench --bench frame_step`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec2;

use starfield::{BlendMode, FrameScheduler, Kernel, Population, Preset, SoftwareContext, WorkGroupSize};

fn scheduler(count: u32, kernel: Kernel) -> FrameScheduler<SoftwareContext> {
    let records = Population::preset(Preset::CollidingGalaxies, count, Vec2::new(2300.0, 1300.0), 7).records();
    FrameScheduler::new(
        SoftwareContext::new([2300.0, 1300.0]),
        &records,
        kernel,
        WorkGroupSize::DEFAULT,
        BlendMode::Alpha,
    )
    .expect("software pipeline")
}

fn bench_integrate_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrate_step");

    for count in [1_000u32, 10_000, 60_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut sched = scheduler(count, Kernel::Integrate);
            b.iter(|| {
                sched.step(0.0, 1.0 / 60.0).expect("step");
                sched.device_mut().take_draws();
            })
        });
    }

    group.finish();
}

fn bench_gravity_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("gravity_step");
    group.sample_size(10);

    for count in [256u32, 1_024] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut sched = scheduler(count, Kernel::gravity());
            b.iter(|| {
                sched.step(0.0, 1.0 / 60.0).expect("step");
                sched.device_mut().take_draws();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_integrate_step, bench_gravity_step);
criterion_main!(benches);
