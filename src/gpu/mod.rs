// gpu/mod.rs — wgpu compute backend.
//
// The host convolvers in the parent crate are the authoritative reference;
// the device program reproduces their per-cell arithmetic and is validated
// against them.
//
//   session   adapter selection → device/queue → program build → release
//   dispatch  workgroup validation and dispatch extents (pure)
//   convolve  DeviceConvolver: buffers, binding, dispatch, blocking readback
//
// A session is expensive to open (instance, device and shader compilation).
// Open it once and hand out `DeviceConvolver`s that borrow it.

pub mod convolve;
pub mod dispatch;
pub mod session;

pub use convolve::DeviceConvolver;
pub use dispatch::{DispatchPlan, WorkgroupSize};
pub use session::{
    AdapterInfo, DevicePreference, DeviceSession, ProgramInfo, ProgramSource, SessionConfig,
    SessionState,
};
