//! Device layer: resource handles, a redundant-call-filtering state cache, render targets,
//! and two backends (wgpu and a recording headless device).

pub mod cache;
pub mod context;
pub mod device;
pub mod handle;
pub mod headless;
pub mod owned;
pub mod state;
pub mod target;
pub mod types;
pub mod wgpu_device;

pub use cache::{CacheStatistics, DeviceStateCache};
pub use context::{GpuContext, ReleaseQueue};
pub use device::{
    DeviceError, GraphicsDevice, MeshData, ProgramDescriptor, SamplerSlot, TargetStatus,
    TextureDescriptor, Vertex, VertexInput,
};
pub use handle::{HandleAllocator, MeshId, ProgramId, Resource, TargetId, TextureId};
pub use headless::{CallLog, DeviceCall, HeadlessDevice};
pub use owned::{Mesh, Program, Texture};
pub use state::{DeviceState, MAX_TEXTURE_SLOTS, StateChange, TargetBinding};
pub use target::{RenderTarget, TargetDescriptor, TargetError};
pub use types::{
    BindMode, BlendEquation, BlendFactor, BlendFunction, DepthMode, Faces, Filter, Layout,
    TestFunction, TextureShape, TextureSpec, Viewport, Wrap, mip_extent, mip_level_count,
};
pub use wgpu_device::{WgpuDevice, WgpuInitError, validate_wgsl};
