// stencil.rs — Square convolution stencils and boundary policies.
//
// Weights are row-major: `weights[ky * size + kx]` multiplies the input at
// offset (kx - r, ky - r) from the output cell, with r = size / 2. The stencil
// is applied as a correlation (no flip), which is what every backend computes.
//
// A stencil may carry a companion weight set. When present, the response is
// the gradient magnitude sqrt(g² + h²) of the two weighted sums; this is how
// the Sobel edge detector is expressed.

use std::fmt;
use std::sync::Arc;

use crate::error::ConvError;

/// How taps that fall outside the grid are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    /// Outside taps read 0.
    ZeroPad,
    /// Outside taps read the nearest edge sample.
    ClampToEdge,
    /// Cells closer than `size / 2` to any edge are written as exactly 0 and
    /// never evaluated.
    SkipBorder,
}

impl Boundary {
    /// Numeric tag shared with the device program.
    pub(crate) fn tag(self) -> u32 {
        match self {
            Boundary::ZeroPad => 0,
            Boundary::ClampToEdge => 1,
            Boundary::SkipBorder => 2,
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::ZeroPad => write!(f, "zero-pad"),
            Boundary::ClampToEdge => write!(f, "clamp-to-edge"),
            Boundary::SkipBorder => write!(f, "skip-and-zero-output"),
        }
    }
}

/// An immutable odd-sized square stencil.
///
/// Cloning is cheap; the weights are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    size: usize,
    weights: Arc<[f32]>,
    companion: Option<Arc<[f32]>>,
    boundary: Boundary,
}

impl Stencil {
    /// A single-weight-set stencil.
    ///
    /// # Errors
    /// `InvalidDimension` if `size` is even or zero, or if `weights` does not
    /// hold exactly `size * size` values.
    pub fn new(size: usize, weights: Vec<f32>, boundary: Boundary) -> Result<Self, ConvError> {
        check_weights(size, &weights, "weights")?;
        Ok(Stencil { size, weights: weights.into(), companion: None, boundary })
    }

    /// A gradient-magnitude stencil: response = sqrt(gx² + gy²).
    pub fn gradient(
        size: usize,
        gx: Vec<f32>,
        gy: Vec<f32>,
        boundary: Boundary,
    ) -> Result<Self, ConvError> {
        check_weights(size, &gx, "horizontal weights")?;
        check_weights(size, &gy, "vertical weights")?;
        Ok(Stencil {
            size,
            weights: gx.into(),
            companion: Some(gy.into()),
            boundary,
        })
    }

    /// 3×3 vertical-edge kernel `[[1,0,-1],[1,0,-1],[1,0,-1]]`, zero-padded.
    pub fn vertical_edge() -> Self {
        Stencil {
            size: 3,
            weights: Arc::from([1.0, 0.0, -1.0, 1.0, 0.0, -1.0, 1.0, 0.0, -1.0]),
            companion: None,
            boundary: Boundary::ZeroPad,
        }
    }

    /// 3×3 Sobel gradient magnitude with a zeroed one-cell border.
    pub fn sobel() -> Self {
        Stencil {
            size: 3,
            weights: Arc::from([-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0]),
            companion: Some(Arc::from([-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0])),
            boundary: Boundary::SkipBorder,
        }
    }

    /// 3×3 box mean (every weight 1/9), clamped at the edges.
    pub fn box_blur() -> Self {
        Stencil {
            size: 3,
            weights: Arc::from([1.0 / 9.0; 9]),
            companion: None,
            boundary: Boundary::ClampToEdge,
        }
    }

    /// Same weights, different boundary policy.
    pub fn with_boundary(&self, boundary: Boundary) -> Self {
        Stencil { boundary, ..self.clone() }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// `size / 2`, the distance from the centre tap to the stencil edge.
    #[inline]
    pub fn radius(&self) -> usize {
        self.size / 2
    }

    #[inline]
    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn companion(&self) -> Option<&[f32]> {
        self.companion.as_deref()
    }

    pub fn is_gradient(&self) -> bool {
        self.companion.is_some()
    }

    /// Weights followed by the companion weights, as uploaded to the device.
    pub(crate) fn packed_weights(&self) -> Vec<f32> {
        let mut packed = self.weights.to_vec();
        if let Some(c) = &self.companion {
            packed.extend_from_slice(c);
        }
        packed
    }

    /// Combine the two weighted sums into the final response.
    #[inline]
    pub(crate) fn combine(&self, g: f32, h: f32) -> f32 {
        if self.companion.is_some() {
            (g * g + h * h).sqrt()
        } else {
            g
        }
    }
}

fn check_weights(size: usize, weights: &[f32], what: &str) -> Result<(), ConvError> {
    if size == 0 || size % 2 == 0 {
        return Err(ConvError::invalid_dimension(format!(
            "stencil size must be odd and at least 1 (got {size})"
        )));
    }
    if weights.len() != size * size {
        return Err(ConvError::invalid_dimension(format!(
            "{what} must hold {} values for a {size}×{size} stencil (got {})",
            size * size,
            weights.len(),
        )));
    }
    Ok(())
}
