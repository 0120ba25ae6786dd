// harness.rs — Backend selection, timing, comparison and device fallback.
//
// One run = build the backend (timed as `setup`), then exactly one
// `convolve` call (timed as `elapsed`). Sessions and thread pools are built
// per run, so `setup` is where device discovery and shader compilation show
// up.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::convolution::Sequential;
use crate::convolver::Convolver;
use crate::error::ConvError;
use crate::gpu::{DeviceConvolver, DevicePreference, DeviceSession, ProgramSource, SessionConfig};
use crate::grid::{Grid, Sample};
use crate::parallel::{HostParallel, ParallelConfig};
use crate::stencil::Stencil;

/// Which convolver a run uses, with what it needs to be built.
#[derive(Debug, Clone)]
pub enum Backend {
    Sequential,
    HostParallel(ParallelConfig),
    Device {
        config: SessionConfig,
        preference: DevicePreference,
        source: ProgramSource,
    },
}

impl Backend {
    /// Device backend with the shipped program and default session settings.
    pub fn device(preference: DevicePreference) -> Self {
        Backend::Device {
            config: SessionConfig::default(),
            preference,
            source: ProgramSource::convolve_wgsl(),
        }
    }
}

/// Result of one timed run.
#[derive(Debug, Clone)]
pub struct RunReport<T: Sample> {
    pub output: Grid<T>,
    /// Time spent in `convolve` alone.
    pub elapsed: Duration,
    /// Time spent building the backend.
    pub setup: Duration,
    /// `Convolver::name` of the backend that produced `output`.
    pub backend: &'static str,
}

/// Build `backend` and run it once.
pub fn run<T: Sample>(backend: &Backend, input: &Grid<T>, stencil: &Stencil) -> Result<RunReport<T>, ConvError> {
    let start = Instant::now();
    match backend {
        Backend::Sequential => timed(&Sequential, start.elapsed(), input, stencil),
        Backend::HostParallel(config) => {
            let pool = HostParallel::new(*config)?;
            timed(&pool, start.elapsed(), input, stencil)
        }
        Backend::Device { config, preference, source } => {
            let session = DeviceSession::open(config.clone(), *preference, source)?;
            timed(&DeviceConvolver::new(&session), start.elapsed(), input, stencil)
        }
    }
}

/// Like [`run`], but a device-path failure reruns on the host-parallel
/// backend with default settings. Host errors are returned as they are.
pub fn run_with_fallback<T: Sample>(
    backend: &Backend,
    input: &Grid<T>,
    stencil: &Stencil,
) -> Result<RunReport<T>, ConvError> {
    match run(backend, input, stencil) {
        Err(e) if matches!(backend, Backend::Device { .. }) && e.stage().is_some() => {
            warn!("device run failed ({e}); falling back to host-parallel");
            run(&Backend::HostParallel(ParallelConfig::default()), input, stencil)
        }
        other => other,
    }
}

fn timed<T: Sample, C: Convolver>(
    convolver: &C,
    setup: Duration,
    input: &Grid<T>,
    stencil: &Stencil,
) -> Result<RunReport<T>, ConvError> {
    let start = Instant::now();
    let output = convolver.convolve(input, stencil)?;
    let elapsed = start.elapsed();
    info!(
        "{}: {}×{} in {:.3} ms (setup {:.3} ms)",
        convolver.name(),
        input.width(),
        input.height(),
        elapsed.as_secs_f64() * 1e3,
        setup.as_secs_f64() * 1e3,
    );
    Ok(RunReport { output, elapsed, setup, backend: convolver.name() })
}

/// Element-wise agreement between two grids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub max_abs_diff: f32,
    /// Cells whose difference exceeds the tolerance.
    pub mismatches: usize,
}

impl Comparison {
    pub fn agrees(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compare `a` against reference `b`.
///
/// A cell matches when `|a - b| <= rel_tol * max(|b|, 1)`. A NaN on either
/// side never matches and makes `max_abs_diff` NaN.
///
/// # Errors
/// `InvalidDimension` if the grids differ in shape.
pub fn compare<T: Sample>(a: &Grid<T>, b: &Grid<T>, rel_tol: f32) -> Result<Comparison, ConvError> {
    if (a.width(), a.height()) != (b.width(), b.height()) {
        return Err(ConvError::invalid_dimension(format!(
            "cannot compare {}×{} with {}×{}",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }
    let mut max_abs_diff = 0.0f32;
    let mut mismatches = 0;
    for (&x, &y) in a.as_slice().iter().zip(b.as_slice()) {
        let (x, y) = (x.to_f32(), y.to_f32());
        let diff = (x - y).abs();
        // f32::max drops NaN. Here a NaN diff wins and then sticks, since
        // nothing compares greater than it.
        if diff.is_nan() || diff > max_abs_diff {
            max_abs_diff = diff;
        }
        if diff.is_nan() || diff > rel_tol * y.abs().max(1.0) {
            mismatches += 1;
        }
    }
    Ok(Comparison { max_abs_diff, mismatches })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Grid<f32> {
        Grid::from_fn(33, 21, |x, y| (x as f32 * 0.5 - y as f32).sin() * 100.0).unwrap()
    }

    #[test]
    fn test_host_backends_agree() {
        let input = ramp();
        let s = Stencil::vertical_edge();
        let seq = run(&Backend::Sequential, &input, &s).unwrap();
        let par = run(&Backend::HostParallel(ParallelConfig { workers: 3 }), &input, &s).unwrap();
        assert_eq!(seq.backend, "sequential");
        assert_eq!(par.backend, "host-parallel");
        let cmp = compare(&par.output, &seq.output, 1e-3).unwrap();
        assert!(cmp.agrees(), "{cmp:?}");
        assert_eq!(cmp.max_abs_diff, 0.0);
    }

    #[test]
    fn test_fallback_without_device() {
        let backend = Backend::Device {
            config: SessionConfig { backends: wgpu::Backends::empty(), ..Default::default() },
            preference: DevicePreference::Gpu,
            source: ProgramSource::convolve_wgsl(),
        };
        let input = ramp();
        let s = Stencil::sobel();

        let err = run(&backend, &input, &s).unwrap_err();
        assert!(matches!(err, ConvError::NoDeviceFound { .. }));

        let report = run_with_fallback(&backend, &input, &s).unwrap();
        assert_eq!(report.backend, "host-parallel");
        assert_eq!(report.output, run(&Backend::Sequential, &input, &s).unwrap().output);
    }

    #[test]
    fn test_compare_counts_mismatches() {
        let a = Grid::from_vec(3, 1, vec![1.0f32, 200.0, 5.0]).unwrap();
        let b = Grid::from_vec(3, 1, vec![1.0f32, 200.1, 7.0]).unwrap();
        let cmp = compare(&a, &b, 1e-3).unwrap();
        assert_eq!(cmp.mismatches, 1);
        assert!((cmp.max_abs_diff - 2.0).abs() < 1e-6);
        assert!(!cmp.agrees());
    }

    #[test]
    fn test_compare_nan_is_mismatch() {
        let a = Grid::from_vec(3, 1, vec![f32::NAN; 3]).unwrap();
        let b = Grid::from_vec(3, 1, vec![1.0f32, 2.0, 3.0]).unwrap();
        let cmp = compare(&a, &b, 1e-3).unwrap();
        assert_eq!(cmp.mismatches, 3);
        assert!(cmp.max_abs_diff.is_nan());
        assert!(!cmp.agrees());

        // A NaN early in the grid stays in max_abs_diff past later finite cells.
        let a = Grid::from_vec(3, 1, vec![f32::NAN, 2.0, 10.0]).unwrap();
        let cmp = compare(&a, &b, 1e-3).unwrap();
        assert_eq!(cmp.mismatches, 2);
        assert!(cmp.max_abs_diff.is_nan());

        // NaN in the reference counts too.
        let cmp = compare(&b, &a, 1e-3).unwrap();
        assert_eq!(cmp.mismatches, 2);
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let a = Grid::filled(2, 2, 0u8).unwrap();
        let b = Grid::filled(2, 3, 0u8).unwrap();
        assert!(compare(&a, &b, 0.0).is_err());
    }
}
