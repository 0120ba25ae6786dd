// parallel.rs — Host-parallel convolver on a fixed rayon pool.
//
// SCHEDULING
// ──────────
// The output is split into `workers` contiguous bands of whole rows, sized
// up front by `partition` (sizes differ by at most one row). Each band is one
// rayon task that owns a disjoint `&mut` slice of the output, so the grid
// needs no locking. `ThreadPool::install` returns only after every task has
// finished; that return is the join barrier.
//
// Each row is computed by `convolution::convolve_row`, the same function the
// sequential backend uses, so the two backends agree bit for bit.
//
// REDUCTIONS
// ──────────
// Scalar reductions (`reduce_sum`) use the same static partition. Every chunk
// sums its terms locally and then adds the partial into a shared atomic f64.
// The cross-chunk order is unspecified, so the result can drift from a
// sequential sum by float rounding only.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use rayon::prelude::*;

use crate::convolution::{convolve_row, Taps};
use crate::convolver::Convolver;
use crate::error::ConvError;
use crate::grid::{Grid, Sample};
use crate::stencil::Stencil;

/// Host-parallel backend configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Worker threads in the pool. 0 picks `std::thread::available_parallelism`.
    pub workers: usize,
}

/// Split `0..len` into at most `parts` contiguous, non-empty ranges that
/// cover every index exactly once. Earlier ranges take the remainder.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len);
    if parts == 0 {
        return Vec::new();
    }
    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let end = start + base + usize::from(i < extra);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Multi-threaded backend with a statically partitioned parallel-for.
pub struct HostParallel {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl HostParallel {
    /// Build the worker pool.
    ///
    /// # Errors
    /// `ThreadPool` if the OS refuses to spawn the threads.
    pub fn new(config: ParallelConfig) -> Result<Self, ConvError> {
        let workers = match config.workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("heteroconv-{i}"))
            .build()?;
        debug!("host-parallel pool ready with {workers} workers");
        Ok(HostParallel { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` once per static chunk of `out`.
    ///
    /// `out` is viewed as `out.len() / unit` units of `unit` elements (rows,
    /// for a grid). Each call receives the unit range it owns and the matching
    /// mutable sub-slice. Returns after every chunk has been processed.
    ///
    /// # Panics
    /// Panics if `unit` is zero or does not divide `out.len()`.
    pub fn for_each_chunk<T, F>(&self, out: &mut [T], unit: usize, f: F)
    where
        T: Send,
        F: Fn(Range<usize>, &mut [T]) + Send + Sync,
    {
        assert!(unit > 0 && out.len() % unit == 0, "unit {unit} must divide length {}", out.len());
        let ranges = partition(out.len() / unit, self.workers);

        let mut chunks = Vec::with_capacity(ranges.len());
        let mut rest = out;
        for range in ranges {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * unit);
            chunks.push((range, head));
            rest = tail;
        }

        self.pool
            .install(|| chunks.into_par_iter().for_each(|(range, chunk)| f(range, chunk)));
    }

    /// Sum `term(i)` for `i` in `0..len` across the pool.
    pub fn reduce_sum<F>(&self, len: usize, term: F) -> f64
    where
        F: Fn(usize) -> f64 + Send + Sync,
    {
        let total = AtomicF64::new(0.0);
        let ranges = partition(len, self.workers);
        self.pool.install(|| {
            ranges.into_par_iter().for_each(|range| {
                let partial: f64 = range.map(&term).sum();
                total.add(partial);
            })
        });
        total.load()
    }
}

impl Convolver for HostParallel {
    fn name(&self) -> &'static str {
        "host-parallel"
    }

    fn convolve<T: Sample>(&self, input: &Grid<T>, stencil: &Stencil) -> Result<Grid<T>, ConvError> {
        let taps = Taps::prepare(input, stencil);
        let mut out: Grid<T> = input.zeros_like();
        let width = input.width();
        self.for_each_chunk(out.as_mut_slice(), width, |rows, band| {
            for (y, row) in rows.zip(band.chunks_exact_mut(width)) {
                convolve_row(&taps, stencil, y, row);
            }
        });
        Ok(out)
    }
}

/// `f64` accumulator updated with compare-and-swap on its bit pattern.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        AtomicF64(AtomicU64::new(v.to_bits()))
    }

    fn add(&self, v: f64) {
        // The closure never returns None, so the update cannot fail.
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some((f64::from_bits(bits) + v).to_bits())
        });
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::Sequential;
    use crate::stencil::Boundary;
    use proptest::prelude::*;

    fn pool(workers: usize) -> HostParallel {
        HostParallel::new(ParallelConfig { workers }).unwrap()
    }

    #[test]
    fn test_partition_shapes() {
        assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 8), vec![0..1, 1..2]);
        assert_eq!(partition(5, 1), vec![0..5]);
        assert!(partition(0, 4).is_empty());
    }

    proptest! {
        #[test]
        fn partition_covers_exactly_once(len in 0usize..2000, parts in 0usize..64) {
            let ranges = partition(len, parts);
            let mut next = 0;
            for r in &ranges {
                prop_assert_eq!(r.start, next);
                prop_assert!(r.end > r.start);
                next = r.end;
            }
            prop_assert_eq!(next, len);
            prop_assert!(ranges.len() <= parts.max(1));
        }
    }

    #[test]
    fn test_write_counter_grid() {
        // Every cell incremented by whichever chunk owns it must end at 1.
        let hp = pool(7);
        let (w, h) = (37, 53);
        let mut counts = vec![0u32; w * h];
        hp.for_each_chunk(&mut counts, w, |_, band| {
            for c in band.iter_mut() {
                *c += 1;
            }
        });
        assert!(counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_chunk_ranges_match_slices() {
        let hp = pool(4);
        let w = 5;
        let mut rows = vec![usize::MAX; w * 10];
        hp.for_each_chunk(&mut rows, w, |range, band| {
            assert_eq!(band.len(), range.len() * w);
            for (y, row) in range.zip(band.chunks_exact_mut(w)) {
                row.fill(y);
            }
        });
        for (i, &y) in rows.iter().enumerate() {
            assert_eq!(y, i / w);
        }
    }

    #[test]
    fn test_matches_sequential_bitwise() {
        let img = Grid::from_fn(64, 45, |x, y| ((x * 13 + y * 7) % 29) as f32 - 11.5).unwrap();
        let hp = pool(6);
        for boundary in [Boundary::ZeroPad, Boundary::ClampToEdge, Boundary::SkipBorder] {
            let s = Stencil::vertical_edge().with_boundary(boundary);
            let seq = Sequential.convolve(&img, &s).unwrap();
            let par = hp.convolve(&img, &s).unwrap();
            assert_eq!(seq, par, "mismatch under {boundary}");
        }
    }

    #[test]
    fn test_more_workers_than_rows() {
        let img = Grid::from_fn(9, 2, |x, y| (x * y) as u8).unwrap();
        let par = pool(16).convolve(&img, &Stencil::sobel()).unwrap();
        assert_eq!(par, Sequential.convolve(&img, &Stencil::sobel()).unwrap());
    }

    #[test]
    fn test_reduce_sum() {
        let hp = pool(5);
        let par = hp.reduce_sum(1000, |i| (i as f64).sqrt());
        let seq: f64 = (0..1000).map(|i| (i as f64).sqrt()).sum();
        assert!((par - seq).abs() < 1e-9 * seq, "{par} vs {seq}");
        assert_eq!(hp.reduce_sum(0, |_| 1.0), 0.0);
    }

    #[test]
    fn test_default_worker_count() {
        assert!(HostParallel::new(ParallelConfig::default()).unwrap().workers() >= 1);
    }
}
