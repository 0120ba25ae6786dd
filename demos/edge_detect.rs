// demos/edge_detect.rs — Sobel edge detection on a chosen backend.
//
// USAGE
// ─────
//   cargo run --example edge_detect                          # generated scene, all backends
//   cargo run --example edge_detect -- in.png                # image file, all backends
//   cargo run --example edge_detect -- in.txt gpu out.png    # text grid, device backend
//
// Backends: seq | par | gpu | cpu-device | all (default). `gpu` and
// `cpu-device` fall back to the host-parallel backend when no matching
// adapter exists. Output is written as a text grid for `.txt` paths and as an
// 8-bit grayscale image otherwise.
//
// Set RUST_LOG=info (or debug) to see adapter selection and timings.

use std::error::Error;
use std::path::Path;

use heteroconv::gpu::DevicePreference;
use heteroconv::harness::{self, Backend, RunReport};
use heteroconv::{io, Grid, ParallelConfig, Stencil};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(2).map(String::as_str).unwrap_or("all");

    let input: Grid<u8> = match args.get(1) {
        Some(path) => load(path)?,
        None => {
            eprintln!("[edge_detect] no input given, using a generated 640×480 scene");
            scene(640, 480)?
        }
    };
    eprintln!("[edge_detect] input {}×{}", input.width(), input.height());

    let backends = match mode {
        "seq" => vec![Backend::Sequential],
        "par" => vec![Backend::HostParallel(ParallelConfig::default())],
        "gpu" => vec![Backend::device(DevicePreference::Gpu)],
        "cpu-device" => vec![Backend::device(DevicePreference::Cpu)],
        "all" => vec![
            Backend::Sequential,
            Backend::HostParallel(ParallelConfig::default()),
            Backend::device(DevicePreference::Gpu),
        ],
        other => return Err(format!("unknown backend `{other}` (seq | par | gpu | cpu-device | all)").into()),
    };

    let stencil = Stencil::sobel();
    let mut reports: Vec<RunReport<u8>> = Vec::new();
    for backend in &backends {
        let report = harness::run_with_fallback(backend, &input, &stencil)?;
        eprintln!(
            "[edge_detect] {:<14} setup {:>9.3} ms   convolve {:>9.3} ms",
            report.backend,
            report.setup.as_secs_f64() * 1e3,
            report.elapsed.as_secs_f64() * 1e3,
        );
        reports.push(report);
    }

    if let Some((reference, rest)) = reports.split_first() {
        for r in rest {
            let cmp = harness::compare(&r.output, &reference.output, 1e-3)?;
            eprintln!(
                "[edge_detect] {} vs {}: max |diff| {:.3}, {} mismatches",
                r.backend, reference.backend, cmp.max_abs_diff, cmp.mismatches
            );
        }
    }

    if let (Some(path), Some(report)) = (args.get(3), reports.last()) {
        save(path, &report.output)?;
        eprintln!("[edge_detect] wrote {path}");
    }
    Ok(())
}

fn is_text(path: &str) -> bool {
    Path::new(path).extension().is_some_and(|e| e == "txt")
}

fn load(path: &str) -> Result<Grid<u8>, Box<dyn Error>> {
    if is_text(path) {
        return Ok(io::load_grid(path)?);
    }
    let img = image::open(path)?.to_luma8();
    let (w, h) = img.dimensions();
    Ok(Grid::from_vec(w as usize, h as usize, img.into_raw())?)
}

fn save(path: &str, grid: &Grid<u8>) -> Result<(), Box<dyn Error>> {
    if is_text(path) {
        return Ok(io::save_grid(path, grid)?);
    }
    let img = image::GrayImage::from_raw(grid.width() as u32, grid.height() as u32, grid.as_slice().to_vec())
        .ok_or("grid does not fit an image buffer")?;
    img.save(path)?;
    Ok(())
}

/// Gradient background with a few bright rectangles.
fn scene(w: usize, h: usize) -> Result<Grid<u8>, Box<dyn Error>> {
    let mut g = Grid::from_fn(w, h, |x, y| ((x * 200 / w) + (y * 55 / h)) as u8)?;
    for rect in 0..6 {
        let rx = (50 + rect * 100) % w;
        let ry = (40 + (rect % 3) * 120) % h;
        for y in ry..(ry + 60).min(h) {
            for x in rx..(rx + 80).min(w) {
                g.set(x, y, 180 + rect as u8 * 10);
            }
        }
    }
    Ok(g)
}
