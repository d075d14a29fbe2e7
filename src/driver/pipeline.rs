//! Pipeline state types
//!
//! [`PipelineState`] is the immutable value object describing everything
//! needed to bind a graphics pipeline: shader stage references, vertex-input
//! layout, and fixed-function modes. It is byte-comparable and hashable so it
//! can be interned; see [`crate::interner`].

use {
    super::{ShaderId, VertexLayoutId},
    derive_builder::{Builder, UninitializedFieldError},
    ordered_float::OrderedFloat,
    std::ops::{BitOr, BitOrAssign},
};

/// Comparison operator used by depth and stencil tests.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Source and destination multipliers used when blending is enabled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Operator combining the blended source and destination values.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Action performed on a stencil-buffer sample.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Triangle faces culled during rasterization.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Winding order defining the front face of a triangle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

/// Rasterization fill mode.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

/// Input primitive assembly.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

/// Bitmask selecting which color components are written.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ColorComponents(u8);

impl ColorComponents {
    pub const R: Self = Self(0b0001);
    pub const G: Self = Self(0b0010);
    pub const B: Self = Self(0b0100);
    pub const A: Self = Self(0b1000);

    /// All four components.
    pub const RGBA: Self = Self(0b1111);

    /// Returns `true` if every component of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ColorComponents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ColorComponents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Specifies color blend state used when rasterization is enabled for any
/// color attachments accessed during rendering.
#[derive(Builder, Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[builder(
    build_fn(private, name = "fallible_build", error = "BlendModeBuilderError"),
    derive(Clone, Copy, Debug),
    pattern = "owned"
)]
pub struct BlendMode {
    /// Controls whether blending is enabled for the corresponding color
    /// attachment.
    ///
    /// If blending is not enabled, the source fragment's color for that
    /// attachment is passed through unmodified.
    #[builder(default = "false")]
    pub blend_enable: bool,

    /// Selects which blend factor is used to determine the source factors.
    #[builder(default = "BlendFactor::SrcColor")]
    pub src_color_blend_factor: BlendFactor,

    /// Selects which blend factor is used to determine the destination
    /// factors.
    #[builder(default = "BlendFactor::OneMinusDstColor")]
    pub dst_color_blend_factor: BlendFactor,

    /// Selects which blend operation is used to calculate the RGB values to
    /// write to the color attachment.
    #[builder(default = "BlendOp::Add")]
    pub color_blend_op: BlendOp,

    /// Selects which blend factor is used to determine the source factor.
    #[builder(default = "BlendFactor::Zero")]
    pub src_alpha_blend_factor: BlendFactor,

    /// Selects which blend factor is used to determine the destination
    /// factor.
    #[builder(default = "BlendFactor::Zero")]
    pub dst_alpha_blend_factor: BlendFactor,

    /// Selects which blend operation is used to calculate the alpha values to
    /// write to the color attachment.
    #[builder(default = "BlendOp::Add")]
    pub alpha_blend_op: BlendOp,

    /// A bitmask specifying which of the R, G, B, and/or A components are
    /// enabled for writing.
    #[builder(default = "ColorComponents::RGBA")]
    pub color_write_mask: ColorComponents,
}

impl BlendMode {
    /// A commonly used blend mode for replacing color attachment values with
    /// new ones.
    pub const REPLACE: Self = Self {
        blend_enable: false,
        src_color_blend_factor: BlendFactor::SrcColor,
        dst_color_blend_factor: BlendFactor::OneMinusDstColor,
        color_blend_op: BlendOp::Add,
        src_alpha_blend_factor: BlendFactor::Zero,
        dst_alpha_blend_factor: BlendFactor::Zero,
        alpha_blend_op: BlendOp::Add,
        color_write_mask: ColorComponents::RGBA,
    };

    /// A commonly used blend mode for blending color attachment values based
    /// on the alpha channel.
    pub const ALPHA: Self = Self {
        blend_enable: true,
        src_color_blend_factor: BlendFactor::SrcAlpha,
        dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
        color_blend_op: BlendOp::Add,
        src_alpha_blend_factor: BlendFactor::SrcAlpha,
        dst_alpha_blend_factor: BlendFactor::OneMinusSrcAlpha,
        alpha_blend_op: BlendOp::Add,
        color_write_mask: ColorComponents::RGBA,
    };

    /// Specifies a default blend mode which is not enabled.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> BlendModeBuilder {
        BlendModeBuilder::default()
    }
}

// the Builder derive macro wants Default to be implemented for BlendMode
impl Default for BlendMode {
    fn default() -> Self {
        Self::REPLACE
    }
}

// HACK: https://github.com/colin-kiegel/rust-derive-builder/issues/56
impl BlendModeBuilder {
    /// Builds a new `BlendMode`.
    pub fn build(self) -> BlendMode {
        self.fallible_build().unwrap()
    }
}

#[derive(Debug)]
struct BlendModeBuilderError;

impl From<UninitializedFieldError> for BlendModeBuilderError {
    fn from(_: UninitializedFieldError) -> Self {
        Self
    }
}

/// Control parameters of a stencil test.
///
/// The stencil reference value is dynamic state carried by each draw command,
/// not part of the pipeline.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StencilMode {
    /// Action performed on samples that fail the stencil test.
    pub fail_op: StencilOp,

    /// Action performed on samples that pass both tests.
    pub pass_op: StencilOp,

    /// Action performed on samples that pass the stencil test and fail the
    /// depth test.
    pub depth_fail_op: StencilOp,

    /// Comparison operator used in the stencil test.
    pub compare_op: CompareOp,

    /// Selects the bits of the stencil values participating in the test.
    pub compare_mask: u32,

    /// Selects the bits of the stencil values updated by the test.
    pub write_mask: u32,
}

impl StencilMode {
    /// A stencil mode which does not modify the stencil buffer.
    pub const IGNORE: Self = Self {
        fail_op: StencilOp::Keep,
        pass_op: StencilOp::Keep,
        depth_fail_op: StencilOp::Keep,
        compare_op: CompareOp::Always,
        compare_mask: !0,
        write_mask: !0,
    };
}

impl Default for StencilMode {
    fn default() -> Self {
        Self::IGNORE
    }
}

/// Specifies the depth bounds test, stencil test, and depth test pipeline
/// state.
#[derive(Builder, Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[builder(
    build_fn(
        private,
        name = "fallible_build",
        error = "DepthStencilModeBuilderError"
    ),
    derive(Clone, Copy, Debug),
    pattern = "owned"
)]
pub struct DepthStencilMode {
    /// Control parameters of the stencil test for back-facing primitives.
    #[builder(default)]
    pub back: StencilMode,

    /// Controls whether depth bounds testing is enabled.
    #[builder(default = "false")]
    pub bounds_test: bool,

    /// The comparison operator used in the depth test.
    #[builder(default = "CompareOp::GreaterOrEqual")]
    pub compare_op: CompareOp,

    /// Controls whether depth testing is enabled.
    #[builder(default = "true")]
    pub depth_test: bool,

    /// Controls whether depth writes are enabled when `depth_test` is `true`.
    #[builder(default = "true")]
    pub depth_write: bool,

    /// Control parameters of the stencil test for front-facing primitives.
    #[builder(default)]
    pub front: StencilMode,

    /// Minimum depth bound used in the depth bounds test.
    #[builder(default = "OrderedFloat(0.0)")]
    pub min: OrderedFloat<f32>,

    /// Maximum depth bound used in the depth bounds test.
    #[builder(default = "OrderedFloat(1.0)")]
    pub max: OrderedFloat<f32>,

    /// Controls whether stencil testing is enabled.
    #[builder(default = "false")]
    pub stencil_test: bool,
}

impl DepthStencilMode {
    /// Specifies a default depth/stencil mode.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> DepthStencilModeBuilder {
        DepthStencilModeBuilder::default()
    }
}

impl Default for DepthStencilMode {
    fn default() -> Self {
        Self::new().build()
    }
}

// HACK: https://github.com/colin-kiegel/rust-derive-builder/issues/56
impl DepthStencilModeBuilder {
    /// Builds a new `DepthStencilMode`.
    pub fn build(self) -> DepthStencilMode {
        self.fallible_build().unwrap()
    }
}

#[derive(Debug)]
struct DepthStencilModeBuilderError;

impl From<UninitializedFieldError> for DepthStencilModeBuilderError {
    fn from(_: UninitializedFieldError) -> Self {
        Self
    }
}

/// Information used to describe a complete graphics pipeline.
///
/// Immutable once built; identical values always intern to the identical
/// [`PipelineStateId`], which is what allows structural equality of draw
/// commands to be reduced to a cheap id comparison.
///
/// [`PipelineStateId`]: crate::interner::PipelineStateId
#[derive(Builder, Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[builder(
    build_fn(
        private,
        name = "fallible_build",
        error = "PipelineStateBuilderError"
    ),
    derive(Clone, Copy, Debug),
    pattern = "owned"
)]
pub struct PipelineState {
    /// The vertex shader stage.
    pub vertex_shader: ShaderId,

    /// The optional fragment shader stage.
    #[builder(default, setter(strip_option))]
    pub fragment_shader: Option<ShaderId>,

    /// The optional geometry shader stage.
    #[builder(default, setter(strip_option))]
    pub geometry_shader: Option<ShaderId>,

    /// The vertex-input layout consumed by the vertex shader.
    pub vertex_layout: VertexLayoutId,

    /// Input primitive assembly.
    #[builder(default = "PrimitiveTopology::TriangleList")]
    pub topology: PrimitiveTopology,

    /// Color blend state.
    #[builder(default)]
    pub blend: BlendMode,

    /// Triangle faces culled during rasterization.
    #[builder(default = "CullMode::Back")]
    pub cull_mode: CullMode,

    /// Winding order defining the front face of a triangle.
    #[builder(default = "FrontFace::CounterClockwise")]
    pub front_face: FrontFace,

    /// Rasterization fill mode.
    #[builder(default = "PolygonMode::Fill")]
    pub polygon_mode: PolygonMode,

    /// Optional depth/stencil state; `None` disables both tests.
    #[builder(default, setter(strip_option))]
    pub depth_stencil: Option<DepthStencilMode>,
}

impl PipelineState {
    /// Specifies a pipeline with the given vertex shader and vertex-input
    /// layout; all other state starts from defaults.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(vertex_shader: ShaderId, vertex_layout: VertexLayoutId) -> PipelineStateBuilder {
        PipelineStateBuilder::default()
            .vertex_shader(vertex_shader)
            .vertex_layout(vertex_layout)
    }
}

impl From<PipelineStateBuilder> for PipelineState {
    fn from(builder: PipelineStateBuilder) -> Self {
        builder.build()
    }
}

// HACK: https://github.com/colin-kiegel/rust-derive-builder/issues/56
impl PipelineStateBuilder {
    /// Builds a new `PipelineState`.
    ///
    /// The vertex shader and vertex layout must have been set.
    pub fn build(self) -> PipelineState {
        self.fallible_build().unwrap()
    }
}

#[derive(Debug)]
struct PipelineStateBuilderError;

impl From<UninitializedFieldError> for PipelineStateBuilderError {
    fn from(_: UninitializedFieldError) -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn blend_mode_default() {
        assert_eq!(BlendMode::default(), BlendMode::REPLACE);
        assert_eq!(BlendMode::new().build(), BlendMode::REPLACE);
    }

    #[test]
    pub fn depth_stencil_mode_builder() {
        let mode = DepthStencilMode::new().build();

        assert_eq!(mode, DepthStencilMode::default());
        assert_eq!(mode.compare_op, CompareOp::GreaterOrEqual);
        assert!(mode.depth_test);
        assert!(!mode.stencil_test);
    }

    #[test]
    pub fn pipeline_state_equality() {
        let vs = ShaderId::new(1);
        let layout = VertexLayoutId::new(2);

        let a = PipelineState::new(vs, layout).build();
        let b = PipelineState::new(vs, layout).build();

        assert_eq!(a, b);

        let c = PipelineState::new(vs, layout)
            .cull_mode(CullMode::None)
            .build();

        assert_ne!(a, c);
    }

    #[test]
    pub fn color_components() {
        let rgb = ColorComponents::R | ColorComponents::G | ColorComponents::B;

        assert!(ColorComponents::RGBA.contains(rgb));
        assert!(!rgb.contains(ColorComponents::A));
    }
}
