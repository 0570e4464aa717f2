//! Scene data read by the renderer: bounds, lights, objects, the camera and
//! procedural meshes for light volumes.

pub mod bounds;
pub mod camera;
pub mod geometry;
pub mod light;
pub mod object;
pub mod scene;

pub use bounds::{Aabb, Frustum};
pub use camera::Camera;
pub use light::{Light, LightKind, ShadowRegion, ShadowTechnique, attenuation, spot_factor};
pub use object::{MaterialParams, Object};
pub use scene::{Background, BackgroundMode, Scene};
