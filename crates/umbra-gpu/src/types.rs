//! Descriptors shared by every device backend.

/// Pixel layout of a texture image.
///
/// Three-channel layouts keep their channel count and per-channel precision;
/// backends without 3-channel render formats store them padded to four channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    R8,
    Rg16F,
    Rg32F,
    Rgb8,
    Rgb16F,
    Rgba8,
    Rgba8Srgb,
    Rgba16F,
    Rgba32F,
    Depth32F,
}

impl Layout {
    /// Number of logical channels.
    pub fn channels(self) -> u32 {
        match self {
            Layout::R8 | Layout::Depth32F => 1,
            Layout::Rg16F | Layout::Rg32F => 2,
            Layout::Rgb8 | Layout::Rgb16F => 3,
            Layout::Rgba8 | Layout::Rgba8Srgb | Layout::Rgba16F | Layout::Rgba32F => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Layout::Depth32F)
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            Layout::Rg16F
                | Layout::Rg32F
                | Layout::Rgb16F
                | Layout::Rgba16F
                | Layout::Rgba32F
                | Layout::Depth32F
        )
    }

    /// Backend storage format for this layout.
    pub fn wgpu_format(self) -> wgpu::TextureFormat {
        match self {
            Layout::R8 => wgpu::TextureFormat::R8Unorm,
            Layout::Rg16F => wgpu::TextureFormat::Rg16Float,
            Layout::Rg32F => wgpu::TextureFormat::Rg32Float,
            Layout::Rgb8 | Layout::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Layout::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            Layout::Rgb16F | Layout::Rgba16F => wgpu::TextureFormat::Rgba16Float,
            Layout::Rgba32F => wgpu::TextureFormat::Rgba32Float,
            Layout::Depth32F => wgpu::TextureFormat::Depth32Float,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wrap {
    Clamp,
    Repeat,
}

/// Layout plus sampling parameters of one texture image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureSpec {
    pub layout: Layout,
    pub filter: Filter,
    pub wrap: Wrap,
}

impl TextureSpec {
    pub const fn new(layout: Layout, filter: Filter, wrap: Wrap) -> Self {
        Self {
            layout,
            filter,
            wrap,
        }
    }

    /// Linear filtering, clamped addressing.
    pub const fn linear(layout: Layout) -> Self {
        Self::new(layout, Filter::Linear, Wrap::Clamp)
    }

    /// Nearest filtering, clamped addressing.
    pub const fn nearest(layout: Layout) -> Self {
        Self::new(layout, Filter::Nearest, Wrap::Clamp)
    }
}

/// Topology of a texture or render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureShape {
    D2,
    Cube,
    Array2D,
    ArrayCube,
}

impl TextureShape {
    pub const ALL: [TextureShape; 4] = [
        TextureShape::D2,
        TextureShape::Cube,
        TextureShape::Array2D,
        TextureShape::ArrayCube,
    ];

    /// Dense index, used for per-slot state tables.
    pub fn index(self) -> usize {
        match self {
            TextureShape::D2 => 0,
            TextureShape::Cube => 1,
            TextureShape::Array2D => 2,
            TextureShape::ArrayCube => 3,
        }
    }

    /// Number of allocated image layers for a logical `depth`.
    ///
    /// `depth` is ignored for `D2` (1 layer) and `Cube` (6 layers).
    pub fn layer_count(self, depth: u32) -> u32 {
        match self {
            TextureShape::D2 => 1,
            TextureShape::Cube => 6,
            TextureShape::Array2D | TextureShape::ArrayCube => depth.max(1),
        }
    }

    pub fn is_cube(self) -> bool {
        matches!(self, TextureShape::Cube | TextureShape::ArrayCube)
    }

    pub fn view_dimension(self) -> wgpu::TextureViewDimension {
        match self {
            TextureShape::D2 => wgpu::TextureViewDimension::D2,
            TextureShape::Cube => wgpu::TextureViewDimension::Cube,
            TextureShape::Array2D => wgpu::TextureViewDimension::D2Array,
            TextureShape::ArrayCube => wgpu::TextureViewDimension::CubeArray,
        }
    }
}

/// How a render target binding is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BindMode {
    Read,
    #[default]
    Write,
    /// Write with linear-to-sRGB conversion on store.
    SrgbWrite,
}

/// Depth attachment allocation for layered targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepthMode {
    #[default]
    None,
    /// A single depth image shared by every layer binding.
    Combined,
    /// One depth layer per color layer, re-targeted with the color layer.
    PerSlice,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TestFunction {
    Never,
    #[default]
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    NotEqual,
    Always,
}

impl TestFunction {
    pub fn wgpu_compare(self) -> wgpu::CompareFunction {
        match self {
            TestFunction::Never => wgpu::CompareFunction::Never,
            TestFunction::Less => wgpu::CompareFunction::Less,
            TestFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            TestFunction::Equal => wgpu::CompareFunction::Equal,
            TestFunction::Greater => wgpu::CompareFunction::Greater,
            TestFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            TestFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            TestFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Faces {
    Front,
    #[default]
    Back,
    FrontAndBack,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend equation plus source/destination factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendFunction {
    pub equation: BlendEquation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunction {
    /// `src + dst`, used to accumulate light contributions.
    pub const ADDITIVE: Self = Self {
        equation: BlendEquation::Add,
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };

    pub const ALPHA: Self = Self {
        equation: BlendEquation::Add,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    pub fn wgpu_blend(self) -> wgpu::BlendState {
        let factor = |f: BlendFactor| match f {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        };
        let operation = match self.equation {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
            BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendEquation::Min => wgpu::BlendOperation::Min,
            BlendEquation::Max => wgpu::BlendOperation::Max,
        };
        // Min/Max ignore factors but wgpu requires them to be One.
        let (src, dst) = match self.equation {
            BlendEquation::Min | BlendEquation::Max => {
                (wgpu::BlendFactor::One, wgpu::BlendFactor::One)
            }
            _ => (factor(self.src), factor(self.dst)),
        };
        let component = wgpu::BlendComponent {
            src_factor: src,
            dst_factor: dst,
            operation,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    }
}

impl Default for BlendFunction {
    fn default() -> Self {
        Self::ADDITIVE
    }
}

/// Pixel rectangle of the bound target that draws land in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Size in texels of mip level `mip` of a `size` extent, never below 1.
pub fn mip_extent(size: u32, mip: u32) -> u32 {
    (size >> mip.min(31)).max(1)
}

/// Number of mip levels of a full chain for the given dimensions.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}
