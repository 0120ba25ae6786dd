// benches/convolution.rs — Sequential vs host-parallel vs device convolution.
//
//   cargo bench --bench convolution
//
// The device group is skipped when no GPU adapter is available. Session
// setup (adapter, device, shader compilation) happens once outside the timed
// loop, so the device numbers cover upload + dispatch + readback.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use heteroconv::gpu::{DeviceConvolver, DevicePreference, DeviceSession, ProgramSource, SessionConfig};
use heteroconv::series;
use heteroconv::{Convolver, Grid, HostParallel, ParallelConfig, Sequential, Stencil};

// ============================================================
// Helpers
// ============================================================

fn make_scene(w: usize, h: usize) -> Grid<u8> {
    let mut img = Grid::from_fn(w, h, |x, y| ((x * 200 / w) + (y * 55 / h)) as u8).unwrap();
    for rect in 0..6 {
        let rx = (50 + rect * 100) % w;
        let ry = (40 + (rect % 3) * 120) % h;
        for y in ry..(ry + 60).min(h) {
            for x in rx..(rx + 80).min(w) {
                img.set(x, y, 180 + rect as u8 * 10);
            }
        }
    }
    img
}

// ============================================================
// Host backends
// ============================================================

fn bench_host(c: &mut Criterion) {
    let pool = HostParallel::new(ParallelConfig::default()).unwrap();
    let mut group = c.benchmark_group("host");

    for &(w, h) in &[(512usize, 512usize), (1920, 1080)] {
        let img = make_scene(w, h);
        let ones = Grid::filled(w, h, 1.0f32).unwrap();
        let label = format!("{w}x{h}");

        group.bench_with_input(BenchmarkId::new("sobel_seq", &label), &img, |b, img| {
            b.iter(|| Sequential.convolve(img, &Stencil::sobel()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("sobel_par", &label), &img, |b, img| {
            b.iter(|| pool.convolve(img, &Stencil::sobel()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("vertical_edge_seq", &label), &ones, |b, g| {
            b.iter(|| Sequential.convolve(g, &Stencil::vertical_edge()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("vertical_edge_par", &label), &ones, |b, g| {
            b.iter(|| pool.convolve(g, &Stencil::vertical_edge()).unwrap())
        });
    }
    group.finish();
}

// ============================================================
// Device backend
// ============================================================

fn bench_device(c: &mut Criterion) {
    let session = match DeviceSession::open(
        SessionConfig::default(),
        DevicePreference::Gpu,
        &ProgramSource::convolve_wgsl(),
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[bench] skipping device benchmarks: {e}");
            return;
        }
    };
    let device = DeviceConvolver::new(&session);

    let mut group = c.benchmark_group("device");
    group.warm_up_time(Duration::from_secs(2));
    for &(w, h) in &[(512usize, 512usize), (1920, 1080)] {
        let img = make_scene(w, h);
        group.bench_with_input(BenchmarkId::new("sobel", format!("{w}x{h}")), &img, |b, img| {
            b.iter(|| device.convolve(img, &Stencil::sobel()).unwrap())
        });
    }
    group.finish();
}

// ============================================================
// Series reduction
// ============================================================

fn bench_series(c: &mut Criterion) {
    let pool = HostParallel::new(ParallelConfig::default()).unwrap();
    c.bench_function("circle_points_360", |b| {
        b.iter(|| series::circle_points(&pool, (400, 300), 200.0, 360))
    });
}

criterion_group!(benches, bench_host, bench_device, bench_series);
criterion_main!(benches);
