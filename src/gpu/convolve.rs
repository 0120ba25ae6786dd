// gpu/convolve.rs — Device convolver: buffers, binding, dispatch, readback.
//
// One call = one dispatch. The steps and the error stage each one reports:
//
//   plan       dispatch::plan             InvalidDispatchShape
//   allocate   input/weights/output/params/staging buffers   BufferAllocation
//   bind       bind group against the session's layout       KernelBinding
//   dispatch   compute pass + copy output → staging          Dispatch
//   readback   map_async + poll(Wait)                        Readback
//
// Each device step runs inside validation and out-of-memory error scopes, so
// a failure is reported against the step that caused it rather than through
// the uncaptured-error handler. The blocking map is the only synchronisation
// point; when `convolve` returns, the device is idle with respect to this
// call.
//
// NEW WGPU / RUST CONCEPTS
// ─────────────────────────
// - `wgpu::util::DeviceExt::create_buffer_init`: allocate and fill a buffer
//   in one call (the buffer is mapped at creation and unmapped for you).
// - `bytemuck::cast_slice`: view `&[f32]` as `&[u8]` for upload, and the
//   mapped `&[u8]` as `&[f32]` for readback, without `unsafe`.

use std::sync::mpsc;

use log::debug;
use wgpu::util::DeviceExt;

use crate::convolver::Convolver;
use crate::error::{ConvError, Stage};
use crate::gpu::dispatch;
use crate::gpu::session::DeviceSession;
use crate::grid::{Grid, Sample, SampleKind};
use crate::stencil::Stencil;

// ---------------------------------------------------------------------------
// Params uniform (must match `Params` in convolve.wgsl)
// ---------------------------------------------------------------------------

/// Layout:
///   offset  0: width    (u32)
///   offset  4: height   (u32)
///   offset  8: size     (u32)
///   offset 12: boundary (u32)
///   offset 16: gradient (u32)
///   offset 20: saturate (u32)
///   offset 24: _pad     (2 × u32)
///   total:  32 bytes
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ConvolveParams {
    width: u32,
    height: u32,
    size: u32,
    boundary: u32,
    gradient: u32,
    saturate: u32,
    _pad: [u32; 2],
}

impl ConvolveParams {
    fn new(width: u32, height: u32, stencil: &Stencil, kind: SampleKind) -> Self {
        ConvolveParams {
            width,
            height,
            size: stencil.size() as u32,
            boundary: stencil.boundary().tag(),
            gradient: u32::from(stencil.is_gradient()),
            saturate: u32::from(kind == SampleKind::U8),
            _pad: [0; 2],
        }
    }
}

struct Buffers {
    input: wgpu::Buffer,
    weights: wgpu::Buffer,
    output: wgpu::Buffer,
    params: wgpu::Buffer,
    staging: wgpu::Buffer,
}

// ---------------------------------------------------------------------------
// DeviceConvolver
// ---------------------------------------------------------------------------

/// Runs convolutions on a Ready [`DeviceSession`].
///
/// Cheap to create; holds only a borrow of the session.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConvolver<'s> {
    session: &'s DeviceSession,
}

impl<'s> DeviceConvolver<'s> {
    pub fn new(session: &'s DeviceSession) -> Self {
        DeviceConvolver { session }
    }

    pub fn session(&self) -> &'s DeviceSession {
        self.session
    }
}

impl Convolver for DeviceConvolver<'_> {
    fn name(&self) -> &'static str {
        "device"
    }

    fn convolve<T: Sample>(&self, input: &Grid<T>, stencil: &Stencil) -> Result<Grid<T>, ConvError> {
        let (ctx, program) = self.session.ready()?;
        let config = self.session.config();
        let device = &ctx.device;
        let limits = device.limits();

        let to_u32 = |v: usize| {
            u32::try_from(v).map_err(|_| ConvError::invalid_dimension(format!("{v} does not fit the device index range")))
        };
        let (width, height) = (to_u32(input.width())?, to_u32(input.height())?);
        let plan = dispatch::plan(width, height, config.workgroup, config.allow_partial_workgroups, &limits)?;

        // --- allocate ---
        let cells: Vec<f32> = input.as_slice().iter().map(|v| v.to_f32()).collect();
        let packed = stencil.packed_weights();
        let grid_bytes = std::mem::size_of_val(cells.as_slice()) as u64;
        let max_binding = u64::from(limits.max_storage_buffer_binding_size);
        if grid_bytes > max_binding {
            return Err(ConvError::device(
                Stage::BufferAllocation,
                format!("{grid_bytes} byte grid exceeds the {max_binding} byte storage binding limit"),
            ));
        }
        let params = ConvolveParams::new(width, height, stencil, T::KIND);

        let buffers = scoped(device, Stage::BufferAllocation, || Buffers {
            input: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("convolve input"),
                contents: bytemuck::cast_slice(&cells),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            weights: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("convolve weights"),
                contents: bytemuck::cast_slice(&packed),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            output: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("convolve output"),
                size: grid_bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            params: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("convolve params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            }),
            staging: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("convolve staging"),
                size: grid_bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        })?;

        // --- bind ---
        let bind_group = scoped(device, Stage::KernelBinding, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("convolve bind group"),
                layout: &program.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: buffers.input.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: buffers.weights.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: buffers.output.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: buffers.params.as_entire_binding() },
                ],
            })
        })?;

        // --- dispatch ---
        debug!(
            "dispatching {}×{} groups for {width}×{height} grid{}",
            plan.groups_x,
            plan.groups_y,
            if plan.padded { " (padded)" } else { "" }
        );
        scoped(device, Stage::Dispatch, || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("convolve"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("convolve"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(plan.groups_x, plan.groups_y, 1);
            }
            encoder.copy_buffer_to_buffer(&buffers.output, 0, &buffers.staging, 0, grid_bytes);
            ctx.queue.submit(std::iter::once(encoder.finish()));
        })?;

        // --- readback ---
        let values = read_back(device, &buffers.staging)?;
        let data = values.into_iter().map(T::from_f32).collect();
        Grid::from_vec(input.width(), input.height(), data)
    }
}

/// Run `f` inside validation and out-of-memory error scopes and report any
/// captured error against `stage`.
fn scoped<R>(device: &wgpu::Device, stage: Stage, f: impl FnOnce() -> R) -> Result<R, ConvError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let out = f();
    let oom = pollster::block_on(device.pop_error_scope());
    let validation = pollster::block_on(device.pop_error_scope());
    match oom.or(validation) {
        Some(e) => Err(ConvError::device(stage, e.to_string())),
        None => Ok(out),
    }
}

/// Map `staging`, wait for the device, copy the floats out.
fn read_back(device: &wgpu::Device, staging: &wgpu::Buffer) -> Result<Vec<f32>, ConvError> {
    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| ConvError::device(Stage::Readback, "map callback never fired"))?
        .map_err(|e| ConvError::device(Stage::Readback, e.to_string()))?;

    let mapped = slice.get_mapped_range();
    let values = bytemuck::cast_slice::<u8, f32>(&mapped).to_vec();
    drop(mapped);
    staging.unmap();
    Ok(values)
}
