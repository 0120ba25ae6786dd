// heteroconv: 2D stencil convolution on interchangeable backends.
//
// The same operation runs sequentially, on a rayon pool, or as a wgpu compute
// dispatch, with one contract for boundary handling and result ownership. The
// sequential convolver is the reference every other backend is checked
// against.

pub mod error;
pub mod grid;
pub mod stencil;
pub mod convolver;
pub mod convolution;
pub mod parallel;
pub mod series;
pub mod gpu;
pub mod harness;
pub mod io;

pub use convolution::Sequential;
pub use convolver::Convolver;
pub use error::{ConvError, Stage};
pub use gpu::{DeviceConvolver, DevicePreference, DeviceSession, ProgramSource, SessionConfig};
pub use grid::{Grid, Sample};
pub use parallel::{HostParallel, ParallelConfig};
pub use stencil::{Boundary, Stencil};
