// grid.rs — Owned 2D sample buffer, generic over sample type.
//
// Layout is row-major with no padding: sample (x, y) lives at
// `data[y * width + x]`. Every backend relies on this: the device convolver
// uploads `as_slice()` verbatim and the host-parallel convolver splits
// `as_mut_slice()` into whole-row bands.
//
// Two sample types exist:
//   u8:  pixel intensity. Responses saturate to [0, 255] and truncate.
//   f32: generic convolution. Responses are stored unchanged.

use std::fmt;

use crate::error::ConvError;

// ---------------------------------------------------------------------------
// Sample trait
// ---------------------------------------------------------------------------

/// Tag passed to the device program so it can reproduce `Sample::from_f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    U8,
    F32,
}

/// Types that can be stored in a [`Grid`].
///
/// All arithmetic happens in `f32`; a sample is widened on read and narrowed
/// once when the response is written.
pub trait Sample: Copy + Default + Send + Sync + PartialOrd + 'static {
    const KIND: SampleKind;

    fn to_f32(self) -> f32;

    /// Narrow a computed response into this sample type.
    fn from_f32(v: f32) -> Self;
}

impl Sample for u8 {
    const KIND: SampleKind = SampleKind::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    /// Clamp to [0, 255], then truncate toward zero.
    ///
    /// Truncation (not rounding) matches the edge-detection program, which
    /// casts `clamp(sqrt(...), 0, 255)` straight to an 8-bit integer.
    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0) as u8
    }
}

impl Sample for f32 {
    const KIND: SampleKind = SampleKind::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Grid<T>
// ---------------------------------------------------------------------------

/// A `width × height` grid of samples with exclusive ownership of its storage.
#[derive(Clone, PartialEq)]
pub struct Grid<T: Sample> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Sample> Grid<T> {
    /// Zero-initialised grid.
    ///
    /// # Errors
    /// `InvalidDimension` if either dimension is zero.
    pub fn new(width: usize, height: usize) -> Result<Self, ConvError> {
        Self::filled(width, height, T::default())
    }

    /// Grid with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Result<Self, ConvError> {
        check_dimensions(width, height)?;
        Ok(Grid { data: vec![value; width * height], width, height })
    }

    /// Wrap an existing row-major vector.
    ///
    /// # Errors
    /// `InvalidDimension` if a dimension is zero or `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self, ConvError> {
        check_dimensions(width, height)?;
        if data.len() != width * height {
            return Err(ConvError::invalid_dimension(format!(
                "data length ({}) must equal width * height ({})",
                data.len(),
                width * height,
            )));
        }
        Ok(Grid { data, width, height })
    }

    /// Build a grid by evaluating `f(x, y)` for every cell.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> T,
    ) -> Result<Self, ConvError> {
        check_dimensions(width, height)?;
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Ok(Grid { data, width, height })
    }

    /// Scratch output with the same shape as `self`. Dimensions are already
    /// known to be valid, so this cannot fail.
    pub(crate) fn zeros_like<U: Sample>(&self) -> Grid<U> {
        Grid {
            data: vec![U::default(); self.width * self.height],
            width: self.width,
            height: self.height,
        }
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of samples (`width * height`).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: a grid has at least one sample.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.data.chunks_exact(self.width)
    }

    /// Iterate over all samples as `(x, y, value)`.
    pub fn samples(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % self.width, i / self.width, v))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Widen every sample to `f32`.
    pub fn to_f32(&self) -> Grid<f32> {
        Grid {
            data: self.data.iter().map(|v| v.to_f32()).collect(),
            width: self.width,
            height: self.height,
        }
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "sample ({x},{y}) out of bounds for grid {}×{}",
            self.width,
            self.height,
        );
    }
}

fn check_dimensions(width: usize, height: usize) -> Result<(), ConvError> {
    if width == 0 || height == 0 {
        return Err(ConvError::invalid_dimension(format!(
            "grid must be at least 1×1 (got {width}×{height})"
        )));
    }
    Ok(())
}

// Small grids print in full; large ones are truncated to the top-left corner.
impl<T: Sample + fmt::Debug> fmt::Debug for Grid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Grid<{}> {{ {}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
        )?;
        for (y, row) in self.rows().take(8).enumerate() {
            write!(f, "  row {y}: {:?}", &row[..row.len().min(16)])?;
            if row.len() > 16 {
                write!(f, " ...")?;
            }
            writeln!(f)?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl<T: Sample> std::ops::Index<(usize, usize)> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.width + x]
    }
}

impl<T: Sample> std::ops::IndexMut<(usize, usize)> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.width + x;
        &mut self.data[idx]
    }
}
