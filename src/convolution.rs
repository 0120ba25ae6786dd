// convolution.rs — Sequential reference convolver and the per-row kernel
// shared with the host-parallel backend.
//
// This is the authoritative implementation: the host-parallel convolver calls
// `convolve_row` on disjoint row bands, and the device program reproduces the
// same tap order (ky outer, kx inner) so results agree to the last bit on the
// host and within float tolerance on the device.
//
// BORDER HANDLING
// ───────────────
//   ZeroPad      build an explicit padded copy with a border of `r` zeros,
//                then every output cell reads a full K×K window from it.
//   ClampToEdge  read the input directly with coordinates clamped into range.
//   SkipBorder   cells within `r` of any edge are written as 0; interior
//                cells read the input directly (their windows never leave
//                the grid).

use crate::convolver::Convolver;
use crate::error::ConvError;
use crate::grid::{Grid, Sample};
use crate::stencil::{Boundary, Stencil};

// ---------------------------------------------------------------------------
// Prepared input
// ---------------------------------------------------------------------------

/// Read-only `f32` view of the input, laid out for the stencil's boundary policy.
///
/// Built once per convolution and shared by every row (and every worker in
/// the host-parallel backend).
pub(crate) struct Taps {
    data: Vec<f32>,
    /// Elements per row of `data` (width + 2r when padded, width otherwise).
    pitch: usize,
    width: usize,
    height: usize,
}

impl Taps {
    pub(crate) fn prepare<T: Sample>(input: &Grid<T>, stencil: &Stencil) -> Self {
        match stencil.boundary() {
            Boundary::ZeroPad => Self::zero_padded(input, stencil.radius()),
            Boundary::ClampToEdge | Boundary::SkipBorder => Taps {
                data: input.as_slice().iter().map(|v| v.to_f32()).collect(),
                pitch: input.width(),
                width: input.width(),
                height: input.height(),
            },
        }
    }

    /// Copy `input` into the centre of a zero-filled `(w + 2r) × (h + 2r)` buffer.
    fn zero_padded<T: Sample>(input: &Grid<T>, r: usize) -> Self {
        let pitch = input.width() + 2 * r;
        let mut data = vec![0.0f32; pitch * (input.height() + 2 * r)];
        for (y, row) in input.rows().enumerate() {
            let start = (y + r) * pitch + r;
            for (dst, &src) in data[start..start + row.len()].iter_mut().zip(row) {
                *dst = src.to_f32();
            }
        }
        Taps { data, pitch, width: input.width(), height: input.height() }
    }
}

// ---------------------------------------------------------------------------
// Row kernel
// ---------------------------------------------------------------------------

/// Evaluate the stencil at one cell. `fetch(kx, ky)` returns the input value
/// under tap (kx, ky) of the window centred on that cell.
#[inline]
fn respond(stencil: &Stencil, fetch: impl Fn(usize, usize) -> f32) -> f32 {
    let k = stencil.size();
    let weights = stencil.weights();
    let companion = stencil.companion();
    let mut g = 0.0f32;
    let mut h = 0.0f32;
    for ky in 0..k {
        for kx in 0..k {
            let i = ky * k + kx;
            let v = fetch(kx, ky);
            g += v * weights[i];
            if let Some(c) = companion {
                h += v * c[i];
            }
        }
    }
    stencil.combine(g, h)
}

/// Compute output row `y` into `out` (length == width).
pub(crate) fn convolve_row<T: Sample>(taps: &Taps, stencil: &Stencil, y: usize, out: &mut [T]) {
    debug_assert_eq!(out.len(), taps.width);
    let (w, h) = (taps.width, taps.height);
    let r = stencil.radius();

    match stencil.boundary() {
        Boundary::ZeroPad => {
            for (x, dst) in out.iter_mut().enumerate() {
                // Padded coordinates: output (x, y) sits at (x + r, y + r), so
                // its window starts at (x, y).
                let v = respond(stencil, |kx, ky| taps.data[(y + ky) * taps.pitch + x + kx]);
                *dst = T::from_f32(v);
            }
        }
        Boundary::ClampToEdge => {
            let clamp = |c: usize, k: usize, max: usize| (c + k).saturating_sub(r).min(max - 1);
            for (x, dst) in out.iter_mut().enumerate() {
                let v = respond(stencil, |kx, ky| {
                    taps.data[clamp(y, ky, h) * taps.pitch + clamp(x, kx, w)]
                });
                *dst = T::from_f32(v);
            }
        }
        Boundary::SkipBorder => {
            let zero = T::from_f32(0.0);
            if y < r || y + r >= h {
                out.fill(zero);
                return;
            }
            for (x, dst) in out.iter_mut().enumerate() {
                *dst = if x < r || x + r >= w {
                    zero
                } else {
                    let v = respond(stencil, |kx, ky| {
                        taps.data[(y + ky - r) * taps.pitch + (x + kx - r)]
                    });
                    T::from_f32(v)
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sequential convolver
// ---------------------------------------------------------------------------

/// Single-threaded reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Convolver for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn convolve<T: Sample>(&self, input: &Grid<T>, stencil: &Stencil) -> Result<Grid<T>, ConvError> {
        let taps = Taps::prepare(input, stencil);
        let mut out: Grid<T> = input.zeros_like();
        let width = input.width();
        for (y, row) in out.as_mut_slice().chunks_exact_mut(width).enumerate() {
            convolve_row(&taps, stencil, y, row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv<T: Sample>(img: &Grid<T>, s: &Stencil) -> Grid<T> {
        Sequential.convolve(img, s).unwrap()
    }

    #[test]
    fn test_identity_stencil() {
        let img = Grid::from_vec(4, 3, (0u8..12).collect()).unwrap();
        let id = Stencil::new(3, vec![0., 0., 0., 0., 1., 0., 0., 0., 0.], Boundary::ZeroPad).unwrap();
        assert_eq!(conv(&img, &id), img);
    }

    #[test]
    fn test_zero_pad_copy() {
        let img = Grid::from_vec(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let taps = Taps::prepare(&img, &Stencil::vertical_edge());
        assert_eq!(taps.pitch, 4);
        #[rustfmt::skip]
        let expected = vec![
            0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 2.0, 0.0,
            0.0, 3.0, 4.0, 0.0,
            0.0, 0.0, 0.0, 0.0,
        ];
        assert_eq!(taps.data, expected);
    }

    #[test]
    fn test_vertical_edge_on_constant_grid() {
        // All-ones 6×5 grid. Interior differences vanish; the zero pad makes
        // the left column negative and the right column positive.
        let img = Grid::filled(6, 5, 1.0f32).unwrap();
        let out = conv(&img, &Stencil::vertical_edge());
        for y in 0..5 {
            let rows = if y == 0 || y == 4 { 2.0 } else { 3.0 };
            assert_eq!(out.get(0, y), -rows, "left column at y={y}");
            assert_eq!(out.get(5, y), rows, "right column at y={y}");
            for x in 1..5 {
                assert_eq!(out.get(x, y), 0.0, "interior at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_clamp_constant_scales_by_weight_sum() {
        let img = Grid::filled(5, 4, 7.0f32).unwrap();
        let s = Stencil::new(3, vec![1.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5], Boundary::ClampToEdge)
            .unwrap();
        let out = conv(&img, &s);
        for (x, y, v) in out.samples() {
            assert!((v - 7.0 * 5.5).abs() < 1e-4, "({x}, {y}) = {v}");
        }
    }

    #[test]
    fn test_clamp_border_replicates_edge() {
        // 1-row grid [10, 20, 30], horizontal [0.25, 0.5, 0.25] in the middle row.
        let img = Grid::from_vec(3, 1, vec![10.0f32, 20.0, 30.0]).unwrap();
        let s = Stencil::new(3, vec![0., 0., 0., 0.25, 0.5, 0.25, 0., 0., 0.], Boundary::ClampToEdge)
            .unwrap();
        let out = conv(&img, &s);
        assert!((out.get(0, 0) - 12.5).abs() < 1e-6);
        assert!((out.get(1, 0) - 20.0).abs() < 1e-6);
        assert!((out.get(2, 0) - 27.5).abs() < 1e-6);
    }

    #[test]
    fn test_sobel_border_is_zero_and_edge_detected() {
        // Vertical step: left half 0, right half 100.
        let img = Grid::from_fn(8, 6, |x, _| if x >= 4 { 100u8 } else { 0 }).unwrap();
        let out = conv(&img, &Stencil::sobel());
        for (x, y, v) in out.samples() {
            if x == 0 || y == 0 || x == 7 || y == 5 {
                assert_eq!(v, 0, "border ({x}, {y}) must be zero");
            }
        }
        // gx = 4 * 100 = 400 → saturates.
        assert_eq!(out.get(3, 2), 255);
        assert_eq!(out.get(4, 2), 255);
        assert_eq!(out.get(1, 2), 0);
        assert_eq!(out.get(6, 2), 0);
    }

    #[test]
    fn test_sobel_truncates() {
        // Ramp of slope 1: gx = 8 everywhere inside, gy = 0 → 8.
        let img = Grid::from_fn(5, 5, |x, _| x as f32).unwrap();
        let out = conv(&img, &Stencil::sobel());
        assert_eq!(out.get(2, 2), 8.0);
        // Half-slope on u8 is impossible, so use a diagonal to get a
        // non-integer magnitude: gx = gy = 8 → 11.31 → 11.
        let diag = Grid::from_fn(5, 5, |x, y| (x + y) as u8).unwrap();
        assert_eq!(conv(&diag, &Stencil::sobel()).get(2, 2), 11);
    }

    #[test]
    fn test_stencil_larger_than_grid() {
        let img = Grid::filled(2, 2, 1.0f32).unwrap();
        let s = Stencil::new(5, vec![1.0; 25], Boundary::ZeroPad).unwrap();
        let out = conv(&img, &s);
        // Every window covers the whole grid.
        assert!(out.samples().all(|(_, _, v)| v == 4.0));

        let skip = conv(&img, &s.with_boundary(Boundary::SkipBorder));
        assert!(skip.samples().all(|(_, _, v)| v == 0.0));
    }

    #[test]
    fn test_single_pixel() {
        let img = Grid::from_vec(1, 1, vec![42.0f32]).unwrap();
        let out = conv(&img, &Stencil::box_blur());
        assert!((out.get(0, 0) - 42.0).abs() < 1e-4);
    }

    #[test]
    fn test_repeat_is_bit_identical() {
        let img = Grid::from_fn(17, 11, |x, y| ((x * 31 + y * 17) % 23) as f32 * 0.37).unwrap();
        let s = Stencil::box_blur().with_boundary(Boundary::ZeroPad);
        let a = conv(&img, &s);
        let b = conv(&img, &s);
        let bits = |g: &Grid<f32>| g.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }
}
