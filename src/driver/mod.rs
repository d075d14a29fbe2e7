//! Backend abstraction: the handles, traits and error type through which this
//! crate talks to a graphics driver.
//!
//! `draw-batch` never calls a graphics API directly. Renderers implement
//! [`Device`] and [`CommandRecorder`] over their backend of choice and hand
//! them to the submission pass.

pub mod pipeline;

use std::{
    error::Error,
    fmt::{Display, Formatter},
};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw backend identifier.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw backend identifier.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Identifies a GPU buffer owned by the backend.
    BufferId
);
handle!(
    /// Identifies a sampler object owned by the backend.
    SamplerId
);
handle!(
    /// Identifies a compiled shader stage owned by the backend.
    ShaderId
);
handle!(
    /// Identifies a texture resource owned by the backend.
    TextureId
);
handle!(
    /// Identifies a typed shader-resource view owned by the backend.
    ViewId
);
handle!(
    /// Identifies a vertex-input layout owned by the backend.
    VertexLayoutId
);
handle!(
    /// Identifies a fully-created pipeline object owned by the backend.
    ///
    /// Produced lazily by [`Device::create_pipeline`], at most once per
    /// distinct interned pipeline state.
    PipelineHandle
);

/// A shader-visible resource slot value: either a raw texture or a typed view.
///
/// Replaces the type-discriminating bitmask of blob-based binding encodings
/// with an explicit tag, so structural equality and hashing operate over typed
/// fields.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceView {
    /// A raw texture bound directly to the slot.
    Texture(TextureId),

    /// A typed view (typically a buffer or texture view) bound to the slot.
    Typed(ViewId),
}

/// Creates backend pipeline objects from interned pipeline state.
pub trait Device {
    /// Creates a pipeline object for `state`.
    ///
    /// Called at most once per distinct [`PipelineStateId`] the first time a
    /// command using that id is submitted.
    ///
    /// [`PipelineStateId`]: crate::interner::PipelineStateId
    fn create_pipeline(
        &self,
        state: &pipeline::PipelineState,
    ) -> Result<PipelineHandle, DriverError>;
}

/// Records state changes and draws into a backend command stream.
///
/// The submission pass calls these methods in order; implementations are not
/// expected to deduplicate state because redundant transitions have already
/// been elided.
pub trait CommandRecorder {
    /// Binds a pipeline object.
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    /// Sets the stencil reference value.
    fn set_stencil_ref(&mut self, stencil_ref: u32);

    /// Binds a vertex buffer to a stream slot.
    fn bind_vertex_buffer(&mut self, stream_index: u32, buffer: BufferId, offset: u32);

    /// Binds an index buffer.
    fn bind_index_buffer(&mut self, buffer: BufferId);

    /// Applies a finalized set of shader-resource bindings.
    fn bind_shader_resources(&mut self, bindings: &crate::bindings::ShaderBindings);

    /// Records a non-indexed draw.
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32);

    /// Records an indexed draw.
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    );

    /// Records a non-indexed draw whose parameters live in `buffer`.
    fn draw_indirect(&mut self, buffer: BufferId, offset: u64);

    /// Records an indexed draw whose parameters live in `buffer`.
    fn draw_indexed_indirect(&mut self, buffer: BufferId, offset: u64);
}

// TODO: A more robust error type and some proper backend error mapping
#[derive(Debug)]
pub enum DriverError {
    InvalidData,
    Unsupported,
    OutOfMemory,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for DriverError {}
