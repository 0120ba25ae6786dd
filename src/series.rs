// series.rs — Taylor-series sine/cosine with parallel term reduction, and a
// circle sampler built on top of them.
//
// Each term is evaluated independently from its index, so the static
// partition of term indices never changes which terms are summed; only the
// order in which partial sums meet differs between runs. Partials are f64
// and accumulate through `HostParallel::reduce_sum`'s atomic accumulator.

use crate::parallel::HostParallel;

/// Terms used by the circle sampler. Enough for |x| ≤ 2π to stay well under
/// a pixel of error at any practical radius.
pub const DEFAULT_TERMS: usize = 12;

/// n-th sine term: (-1)^n x^(2n+1) / (2n+1)!
fn sin_term(x: f64, n: usize) -> f64 {
    let mut t = x;
    for k in 1..=n {
        let k = k as f64;
        t *= -x * x / ((2.0 * k) * (2.0 * k + 1.0));
    }
    t
}

/// n-th cosine term: (-1)^n x^(2n) / (2n)!
fn cos_term(x: f64, n: usize) -> f64 {
    let mut t = 1.0;
    for k in 1..=n {
        let k = k as f64;
        t *= -x * x / ((2.0 * k - 1.0) * (2.0 * k));
    }
    t
}

/// sin(x) from the first `terms` Taylor terms, summed across the pool.
pub fn sin_taylor(pool: &HostParallel, x: f64, terms: usize) -> f64 {
    pool.reduce_sum(terms, |n| sin_term(x, n))
}

/// cos(x) from the first `terms` Taylor terms, summed across the pool.
pub fn cos_taylor(pool: &HostParallel, x: f64, terms: usize) -> f64 {
    pool.reduce_sum(terms, |n| cos_term(x, n))
}

/// `samples` points evenly spaced in angle on the circle of `radius` around
/// `center`, starting at angle 0 and going counter-clockwise in math
/// orientation. Coordinates are truncated toward zero.
///
/// Points are computed in parallel over static angle chunks; each point's
/// sine and cosine are themselves parallel reductions on the same pool.
pub fn circle_points(
    pool: &HostParallel,
    center: (i32, i32),
    radius: f64,
    samples: usize,
) -> Vec<(i32, i32)> {
    let mut points = vec![(0, 0); samples];
    if samples == 0 {
        return points;
    }
    let step = std::f64::consts::TAU / samples as f64;
    pool.for_each_chunk(&mut points, 1, |range, chunk| {
        for (t, p) in range.zip(chunk.iter_mut()) {
            let rad = t as f64 * step;
            let x = radius * cos_taylor(pool, rad, DEFAULT_TERMS) + center.0 as f64;
            let y = radius * sin_taylor(pool, rad, DEFAULT_TERMS) + center.1 as f64;
            *p = (x as i32, y as i32);
        }
    });
    points
}
