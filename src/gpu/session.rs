// gpu/session.rs — Device session: adapter selection, context creation,
// program build and release, as an explicit state machine.
//
//   Uninitialized ──select_device──▶ DeviceSelected ──create_context──▶ ContextReady
//        ──build_program──▶ ProgramBuilt ──(pipeline)──▶ Ready ──release──▶ Released
//
// Any lifecycle step that fails releases everything acquired so far and
// leaves the session in `Failed`. Calling a step out of order is reported as
// `ConvError::SessionState` and changes nothing.
//
// ADAPTER SELECTION
// ─────────────────
// Adapters are enumerated explicitly on the configured backends and filtered
// by device class. `Gpu` takes real or virtual hardware, ranked discrete →
// integrated → virtual → other; `Cpu` takes software adapters (llvmpipe,
// lavapipe, WARP), which report `DeviceType::Cpu`.
//
// DEVICE + QUEUE
// ──────────────
// wgpu creates the device and its queue in one request, so there is no
// separate queue step. An uncaptured-error handler is installed on the new
// device so errors outside an error scope reach the log instead of panicking.
//
// PROGRAM BUILD
// ─────────────
// The WGSL source is specialised by replacing `{{WG_X}}` / `{{WG_Y}}` with
// the configured workgroup size, then compiled inside a validation error
// scope so the compiler diagnostic can be handed back to the caller. The
// compute pipeline is created in a second scope; a missing entry point fails
// there.
//
// RELEASE ORDER
// ─────────────
// program → queue → device → adapter → instance. The instance goes last so no
// device-level object outlives it.

use std::fmt;

use log::{debug, error, info, warn};

use crate::error::{ConvError, Stage};
use crate::gpu::dispatch::WorkgroupSize;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which class of compute device to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevicePreference {
    /// A software adapter running on the host processor.
    Cpu,
    /// Discrete, integrated or virtual graphics hardware.
    Gpu,
}

impl DevicePreference {
    /// Selection rank for an adapter type, lower is better. `None` rejects it.
    fn rank(self, device_type: wgpu::DeviceType) -> Option<u8> {
        use wgpu::DeviceType as D;
        match (self, device_type) {
            (DevicePreference::Cpu, D::Cpu) => Some(0),
            (DevicePreference::Gpu, D::DiscreteGpu) => Some(0),
            (DevicePreference::Gpu, D::IntegratedGpu) => Some(1),
            (DevicePreference::Gpu, D::VirtualGpu) => Some(2),
            (DevicePreference::Gpu, D::Other) => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Cpu => write!(f, "CPU"),
            DevicePreference::Gpu => write!(f, "GPU"),
        }
    }
}

/// Session settings. Plain struct; override fields on top of `Default`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backends to enumerate adapters on.
    pub backends: wgpu::Backends,
    /// Limits requested for the device.
    pub limits: wgpu::Limits,
    /// Workgroup shape baked into the program.
    pub workgroup: WorkgroupSize,
    /// Allow ceil-division dispatches whose last groups overhang the grid.
    pub allow_partial_workgroups: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            backends: wgpu::Backends::PRIMARY,
            limits: wgpu::Limits::default(),
            workgroup: WorkgroupSize::default(),
            allow_partial_workgroups: true,
        }
    }
}

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    DeviceSelected,
    ContextReady,
    ProgramBuilt,
    Ready,
    Released,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::DeviceSelected => "device-selected",
            SessionState::ContextReady => "context-ready",
            SessionState::ProgramBuilt => "program-built",
            SessionState::Ready => "ready",
            SessionState::Released => "released",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Adapter details kept for logging and reports.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Device program text plus the entry point to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub source: String,
    pub entry_point: String,
}

impl ProgramSource {
    pub fn new(source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        ProgramSource { source: source.into(), entry_point: entry_point.into() }
    }

    /// The convolution program shipped with the crate (`convolve` entry point).
    pub fn convolve_wgsl() -> Self {
        ProgramSource::new(include_str!("../shaders/convolve.wgsl"), "convolve")
    }

    /// Source with the workgroup placeholders filled in.
    fn specialise(&self, workgroup: WorkgroupSize) -> String {
        self.source
            .replace("{{WG_X}}", &workgroup.x.to_string())
            .replace("{{WG_Y}}", &workgroup.y.to_string())
    }
}

/// What a successful build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub entry_point: String,
    pub workgroup: WorkgroupSize,
}

// ---------------------------------------------------------------------------
// Owned handles
// ---------------------------------------------------------------------------

struct Selected {
    adapter: wgpu::Adapter,
    info: AdapterInfo,
}

/// Device and queue. Fields drop top to bottom: queue, then device.
pub(crate) struct Context {
    pub(crate) queue: wgpu::Queue,
    pub(crate) device: wgpu::Device,
}

/// Compiled pipeline plus the bind-group layout the convolver binds against.
pub(crate) struct Program {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: wgpu::BindGroupLayout,
    info: ProgramInfo,
}

// ---------------------------------------------------------------------------
// DeviceSession
// ---------------------------------------------------------------------------

/// One compute device, its context and one compiled program.
///
/// Create with [`DeviceSession::new`] and drive the steps yourself, or use
/// [`DeviceSession::open`] to run all of them. Dropping the session releases
/// everything it holds.
pub struct DeviceSession {
    config: SessionConfig,
    state: SessionState,
    program: Option<Program>,
    context: Option<Context>,
    selected: Option<Selected>,
    instance: Option<wgpu::Instance>,
}

impl DeviceSession {
    /// A session with nothing acquired yet.
    pub fn new(config: SessionConfig) -> Self {
        DeviceSession {
            config,
            state: SessionState::Uninitialized,
            program: None,
            context: None,
            selected: None,
            instance: None,
        }
    }

    /// Select a device, create its context and build `source`.
    ///
    /// # Errors
    /// The first lifecycle step that fails; the partial session is released.
    pub fn open(
        config: SessionConfig,
        preference: DevicePreference,
        source: &ProgramSource,
    ) -> Result<Self, ConvError> {
        let mut session = DeviceSession::new(config);
        session.select_device(preference)?;
        session.create_context()?;
        session.build_program(source)?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn adapter_info(&self) -> Option<&AdapterInfo> {
        self.selected.as_ref().map(|s| &s.info)
    }

    pub fn program_info(&self) -> Option<&ProgramInfo> {
        self.program.as_ref().map(|p| &p.info)
    }

    /// Pick the best adapter of the requested class.
    ///
    /// # Errors
    /// `NoDeviceFound` when no adapter of that class is visible.
    pub fn select_device(&mut self, preference: DevicePreference) -> Result<&AdapterInfo, ConvError> {
        self.require(SessionState::Uninitialized)?;

        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.config.backends,
            flags,
            ..Default::default()
        });

        let mut best: Option<(u8, wgpu::Adapter, AdapterInfo)> = None;
        for adapter in instance.enumerate_adapters(self.config.backends) {
            let info = AdapterInfo::from(adapter.get_info());
            debug!("adapter: {info}");
            let Some(rank) = preference.rank(info.device_type) else {
                continue;
            };
            if best.as_ref().map_or(true, |(r, _, _)| rank < *r) {
                best = Some((rank, adapter, info));
            }
        }
        self.instance = Some(instance);

        let Some((_, adapter, info)) = best else {
            return Err(self.fail(ConvError::NoDeviceFound { preference }));
        };
        info!("selected {preference} adapter {info}");
        self.state = SessionState::DeviceSelected;
        Ok(&self.selected.insert(Selected { adapter, info }).info)
    }

    /// Request the device and its queue from the selected adapter.
    pub fn create_context(&mut self) -> Result<(), ConvError> {
        self.require(SessionState::DeviceSelected)?;
        let Some(selected) = self.selected.as_ref() else {
            return Err(self.fail(ConvError::device(Stage::ContextCreation, "no adapter held")));
        };

        let desc = wgpu::DeviceDescriptor {
            label: Some("heteroconv"),
            required_features: wgpu::Features::empty(),
            required_limits: self.config.limits.clone(),
            memory_hints: wgpu::MemoryHints::default(),
        };
        let requested = pollster::block_on(selected.adapter.request_device(&desc, None));
        let (device, queue) = match requested {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(ConvError::device(Stage::ContextCreation, e.to_string()))),
        };

        device.on_uncaptured_error(Box::new(|e: wgpu::Error| error!("uncaptured device error: {e}")));
        self.context = Some(Context { queue, device });
        self.state = SessionState::ContextReady;
        debug!("device context ready");
        Ok(())
    }

    /// Compile `source` and create the compute pipeline for its entry point.
    ///
    /// # Errors
    /// `ProgramBuild` with the compiler diagnostic if the source does not
    /// compile, does not export the entry point, or the workgroup does not
    /// fit the device.
    pub fn build_program(&mut self, source: &ProgramSource) -> Result<&ProgramInfo, ConvError> {
        self.require(SessionState::ContextReady)?;
        let workgroup = self.config.workgroup;
        let build_error = |diagnostic: String| ConvError::ProgramBuild {
            entry_point: source.entry_point.clone(),
            diagnostic,
        };

        let Some(ctx) = self.context.as_ref() else {
            return Err(self.fail(ConvError::device(Stage::ProgramBuild, "no context held")));
        };
        let device = &ctx.device;

        if let Err(reason) = workgroup.check(&device.limits()) {
            return Err(self.fail(build_error(format!("workgroup {workgroup}: {reason}"))));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("convolution program"),
            source: wgpu::ShaderSource::Wgsl(source.specialise(workgroup).into()),
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(self.fail(build_error(e.to_string())));
        }
        self.state = SessionState::ProgramBuilt;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("convolve BGL"),
            entries: &[
                storage_entry(0, true),  // input
                storage_entry(1, true),  // weights
                storage_entry(2, false), // output
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("convolve pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(source.entry_point.as_str()),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: &source.entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(self.fail(build_error(e.to_string())));
        }

        info!("built program `{}` with workgroup {workgroup}", source.entry_point);
        self.state = SessionState::Ready;
        let info = ProgramInfo { entry_point: source.entry_point.clone(), workgroup };
        Ok(&self.program.insert(Program { pipeline, layout, info }).info)
    }

    /// Drop every handle in release order. Safe to call more than once.
    pub fn release(&mut self) {
        let held = self.instance.is_some();
        self.program = None;
        self.context = None;
        self.selected = None;
        self.instance = None;
        if self.state != SessionState::Failed {
            self.state = SessionState::Released;
        }
        if held {
            debug!("device session released");
        }
    }

    /// Context and program of a Ready session.
    pub(crate) fn ready(&self) -> Result<(&Context, &Program), ConvError> {
        match (self.state, &self.context, &self.program) {
            (SessionState::Ready, Some(ctx), Some(program)) => Ok((ctx, program)),
            (actual, _, _) => Err(ConvError::SessionState { expected: SessionState::Ready, actual }),
        }
    }

    fn require(&self, expected: SessionState) -> Result<(), ConvError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConvError::SessionState { expected, actual: self.state })
        }
    }

    /// Release what was acquired, enter `Failed`, hand the error back.
    fn fail(&mut self, err: ConvError) -> ConvError {
        warn!("device session failed: {err}");
        self.state = SessionState::Failed;
        self.release();
        err
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("adapter", &self.adapter_info())
            .field("program", &self.program_info())
            .finish()
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
