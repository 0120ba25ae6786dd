// convolver.rs — The one capability every backend provides.
//
// Sequential, HostParallel and DeviceConvolver differ only in scheduling and
// memory model; the numerical contract is identical:
//   - output has the input's dimensions,
//   - each cell is the stencil response under the stencil's boundary policy,
//   - the response is narrowed with `Sample::from_f32`.

use crate::error::ConvError;
use crate::grid::{Grid, Sample};
use crate::stencil::Stencil;

/// A backend that can apply a [`Stencil`] to a [`Grid`].
pub trait Convolver {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Convolve `input` with `stencil`, returning a new grid of the same shape.
    fn convolve<T: Sample>(&self, input: &Grid<T>, stencil: &Stencil) -> Result<Grid<T>, ConvError>;
}
