//! Performance benchmarks for wlswarm
//!
//! Measures the per-window overhead the harness itself adds: the render
//! step and a full acquire/release cycle against the headless backend.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use wlswarm::backend::headless::HeadlessDisplay;
use wlswarm::backend::GraphicsBackend;
use wlswarm::render::{Brightness, DEFAULT_STEP};
use wlswarm::window::{WindowGeometry, WindowLifecycle};
use wlswarm::WindowId;

/// Benchmark the brightness animation step
fn bench_brightness_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("brightness");

    for step in [DEFAULT_STEP, 0.05, 1.0] {
        group.bench_function(format!("advance_step_{}", step), |b| {
            let mut brightness = Brightness::new(0.0, step);
            b.iter(|| black_box(brightness.advance()));
        });
    }

    group.finish();
}

/// Benchmark one window's acquire + release cycle
fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");
    let display = HeadlessDisplay::new();
    let backend = match display.connect() {
        Ok(backend) => backend,
        Err(e) => panic!("headless connect failed: {}", e),
    };
    let geometry = WindowGeometry::new(64, 64, "bench");

    group.bench_function("acquire_release", |b| {
        b.iter_batched(
            || {
                let resources = backend.new_window(WindowId(0), &geometry);
                WindowLifecycle::new(WindowId(0), resources, Brightness::default())
            },
            |mut window| {
                black_box(window.acquire().is_ok());
                window.start();
                black_box(window.release().len());
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("render_frame", |b| {
        let resources = backend.new_window(WindowId(1), &geometry);
        let mut window = WindowLifecycle::new(WindowId(1), resources, Brightness::default());
        if window.acquire().is_err() {
            panic!("headless acquire failed");
        }
        window.start();
        b.iter(|| black_box(window.render().is_ok()));
    });

    group.finish();
}

criterion_group!(benches, bench_brightness_advance, bench_lifecycle);
criterion_main!(benches);
