//! Deferred renderer: G-buffer, variance shadow maps, SSAO, light
//! accumulation, bloom, tonemapping and FXAA on top of `umbra-gpu`.

pub mod box_blur;
pub mod deferred;
pub mod gaussian_blur;
pub mod gbuffer;
pub mod lighting;
pub mod postprocess;
pub mod screen;
pub mod shadow;
pub mod ssao;

use umbra_gpu::{DeviceError, TargetError};

pub use box_blur::BoxBlur;
pub use deferred::{DeferredRenderer, FrameReport, RendererSettings, Stage};
pub use gaussian_blur::GaussianBlur;
pub use gbuffer::GBuffer;
pub use lighting::{Lighting, ViewInputs};
pub use postprocess::PostProcess;
pub use screen::ScreenPass;
pub use shadow::{LightGroup, LightRef, ShadowMap, ShadowMapKind, ShadowSettings, plan_shadow_maps};
pub use ssao::Ssao;

/// Failures while building or resizing renderer resources.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
