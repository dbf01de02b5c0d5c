use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure taxonomy for the renderer core.
///
/// Setup errors terminate initialization and are never retried. Per-frame
/// errors (submission, presentation) are unrecoverable by design; there is no
/// device-loss path. The contract variants report misuse that older engines
/// left as undefined behavior.
#[derive(Debug, Error)]
pub enum Error {
    #[error("adapter '{adapter}' does not support hardware ray tracing")]
    RayTracingUnsupported { adapter: String },

    #[error("surface format {0:?} cannot back the ray-dispatch output image")]
    UnsupportedSurfaceFormat(wgpu::TextureFormat),

    #[error("failed to create rendering surface")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable GPU adapter found")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create device and queue")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("surface reports no default configuration for this adapter")]
    SurfaceConfig,

    #[error("unknown shader export '{0}': the ray pipeline was not built with it")]
    UnknownShaderExport(String),

    #[error("shader table was already generated; call reset() before appending new entries")]
    ShaderTableNotReset,

    #[error("shader table has no entries; add programs before generating")]
    ShaderTableEmpty,

    #[error("failed to map shader table storage for writing")]
    ShaderTableMap,

    #[error("top-level structure has not been built yet")]
    TlasNotBuilt,

    #[error("refit requires an unchanged instance set: built with {built} instances, got {requested}")]
    RefitShapeChanged { built: u32, requested: u32 },

    #[error("refit requested before any full build")]
    RefitWithoutBuild,

    #[error("buffer '{label}' is still referenced by fence target {target} (completed {completed})")]
    BufferInFlight {
        label: String,
        target: u64,
        completed: u64,
    },

    #[error("fence target {target} was never signaled (last signaled {last_signaled})")]
    WaitTargetNotSignaled { target: u64, last_signaled: u64 },

    #[error("blocking GPU wait failed")]
    Poll(#[from] wgpu::PollError),

    #[error("presentation failed")]
    Surface(#[from] wgpu::SurfaceError),
}
