// error.rs — Error taxonomy shared by every backend.
//
// All errors are fatal to the convolution attempt that produced them. Nothing
// in the engine retries; the harness decides whether a device failure should
// fall back to host execution.

use std::fmt;

use crate::gpu::dispatch::WorkgroupSize;
use crate::gpu::session::{DevicePreference, SessionState};

/// The device-side step that was running when a platform call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DeviceSelection,
    ContextCreation,
    ProgramBuild,
    BufferAllocation,
    KernelBinding,
    Dispatch,
    Readback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DeviceSelection => "device selection",
            Stage::ContextCreation => "context creation",
            Stage::ProgramBuild => "program build",
            Stage::BufferAllocation => "buffer allocation",
            Stage::KernelBinding => "kernel binding",
            Stage::Dispatch => "dispatch",
            Stage::Readback => "readback",
        };
        f.write_str(name)
    }
}

/// Errors from grid/stencil construction, the convolvers and the device session.
#[derive(Debug, thiserror::Error)]
pub enum ConvError {
    /// A grid or stencil was built with an impossible shape.
    #[error("invalid dimension: {reason}")]
    InvalidDimension { reason: String },

    /// No adapter of the requested class is visible on the configured backends.
    #[error("no {preference} compute device found")]
    NoDeviceFound { preference: DevicePreference },

    /// The device program failed to compile or does not export the entry point.
    /// `diagnostic` is the compiler output, unmodified.
    #[error("program build failed for entry point `{entry_point}`:\n{diagnostic}")]
    ProgramBuild {
        entry_point: String,
        diagnostic: String,
    },

    /// A platform call failed after the session was set up.
    #[error("device operation failed during {stage}: {message}")]
    DeviceOperation { stage: Stage, message: String },

    /// The grid cannot be covered by the requested workgroup shape.
    #[error("invalid dispatch shape for {width}×{height} grid with workgroup {workgroup}: {reason}")]
    InvalidDispatchShape {
        width: u32,
        height: u32,
        workgroup: WorkgroupSize,
        reason: String,
    },

    /// A session operation was called out of order.
    #[error("device session is {actual}, expected {expected}")]
    SessionState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("failed to build host thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ConvError {
    pub(crate) fn invalid_dimension(reason: impl Into<String>) -> Self {
        ConvError::InvalidDimension { reason: reason.into() }
    }

    pub(crate) fn device(stage: Stage, message: impl Into<String>) -> Self {
        ConvError::DeviceOperation { stage, message: message.into() }
    }

    /// The device stage this error belongs to, if it came from the device path.
    ///
    /// Compile failures report [`Stage::ProgramBuild`] even though they carry
    /// their own variant, so callers can match on the stage alone.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ConvError::NoDeviceFound { .. } => Some(Stage::DeviceSelection),
            ConvError::ProgramBuild { .. } => Some(Stage::ProgramBuild),
            ConvError::DeviceOperation { stage, .. } => Some(*stage),
            ConvError::InvalidDispatchShape { .. } => Some(Stage::Dispatch),
            _ => None,
        }
    }
}
