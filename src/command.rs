//! Finalized draw commands and the lightweight per-frame references to them

use {
    crate::{
        bindings::ShaderBindings,
        driver::BufferId,
        interner::PipelineStateId,
    },
    std::{
        ops::{BitOr, BitOrAssign},
        sync::Arc,
    },
};

/// Highest vertex stream slot a draw command may bind, exclusive.
pub const MAX_VERTEX_STREAMS: usize = 16;

/// One bound vertex stream of a draw command.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VertexStream {
    /// The stream slot this buffer binds to.
    pub stream_index: u32,

    /// The bound vertex buffer.
    pub buffer: BufferId,

    /// Byte offset of the first vertex.
    pub offset: u32,
}

/// Draw parameters: either CPU-known counts or a reference into an
/// indirect-arguments buffer.
///
/// An indirect command's count is unknown on the CPU, so it can never merge
/// into an instanced run with direct commands.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DrawParams {
    /// CPU-known draw parameters.
    Direct {
        /// Added to each index before fetching the vertex; the first vertex
        /// of a non-indexed draw.
        base_vertex: i32,

        /// First index (indexed draws) or vertex (non-indexed draws).
        first_element: u32,

        /// Number of indices or vertices drawn.
        element_count: u32,

        /// Instances baked into the command itself; multiplied by the merged
        /// run length at submission.
        instance_count: u32,
    },

    /// Parameters fetched by the GPU from an arguments buffer.
    Indirect {
        /// The indirect-arguments buffer.
        buffer: BufferId,

        /// Byte offset of the arguments within `buffer`.
        offset: u64,
    },
}

/// An immutable, finalized draw command.
///
/// Build one field-by-field, then hand it to a finalize context
/// ([`crate::finalize`]) which resolves the pipeline id, validates the
/// bindings and freezes the command behind an [`Arc`]. Structural equality
/// and hashing cover the full content, so two commands built from different
/// primitives with identical content compare equal. Both the bucket cache and
/// the instancing merge are keyed on that property.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DrawCommand {
    /// The interned pipeline state; set by the finalize context.
    pub pipeline_id: PipelineStateId,

    /// Bound vertex streams, ordered by stream slot.
    pub vertex_streams: Vec<VertexStream>,

    /// Stream slot fed from the instance-identity side buffer instead of a
    /// regular vertex buffer, if the shader consumes per-instance data.
    pub instance_id_stream_index: Option<u32>,

    /// Shader-resource bindings for every active stage.
    pub bindings: ShaderBindings,

    /// Index buffer, or `None` for non-indexed draws.
    pub index_buffer: Option<BufferId>,

    /// Draw parameters.
    pub params: DrawParams,

    /// Stencil reference value applied while this command draws.
    pub stencil_ref: u32,
}

impl DrawCommand {
    /// Constructs a command with no pipeline id, no streams and an empty
    /// direct draw; callers fill the fields before finalizing.
    pub fn new(bindings: ShaderBindings) -> Self {
        Self {
            pipeline_id: PipelineStateId::INVALID,
            vertex_streams: vec![],
            instance_id_stream_index: None,
            bindings,
            index_buffer: None,
            params: DrawParams::Direct {
                base_vertex: 0,
                first_element: 0,
                element_count: 0,
                instance_count: 1,
            },
            stencil_ref: 0,
        }
    }

    /// Returns `true` if this command's parameters come from an indirect
    /// arguments buffer.
    pub fn is_indirect(&self) -> bool {
        matches!(self.params, DrawParams::Indirect { .. })
    }
}

/// Orders visible draws for submission.
///
/// The comparator that produces these keys is an external, swappable policy;
/// the submission pass only requires that structurally-identical commands end
/// up contiguous.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DrawSortKey(pub u64);

/// Per-visible-draw flags.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct DrawFlags(u8);

impl DrawFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The command consumes the instance-identity stream.
    pub const HAS_INSTANCE_ID_STREAM: Self = Self(1);

    /// Returns `true` if every flag of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DrawFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DrawFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A small, frame-local reference to a finalized draw command.
///
/// Many `VisibleDraw`s may reference the same command; visibility
/// determination creates them and they die with the frame.
#[derive(Clone, Debug)]
pub struct VisibleDraw {
    /// The finalized command.
    pub command: Arc<DrawCommand>,

    /// Stable per-primitive identity the GPU scene resolves per-instance
    /// data from.
    pub instance_id: u32,

    /// Submission order key.
    pub sort_key: DrawSortKey,

    /// Flags describing how this draw is submitted.
    pub flags: DrawFlags,
}

impl VisibleDraw {
    /// Constructs a reference to `command` carrying `instance_id`.
    ///
    /// The instance-id stream flag is derived from the command.
    pub fn new(command: &Arc<DrawCommand>, instance_id: u32, sort_key: DrawSortKey) -> Self {
        let mut flags = DrawFlags::NONE;

        if command.instance_id_stream_index.is_some() {
            flags |= DrawFlags::HAS_INSTANCE_ID_STREAM;
        }

        Self {
            command: Arc::clone(command),
            instance_id,
            sort_key,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::bindings::{ShaderStage, StageLayout},
    };

    fn command() -> DrawCommand {
        let mut command = DrawCommand::new(ShaderBindings::new([StageLayout::empty(
            ShaderStage::Vertex,
        )]));
        command.vertex_streams.push(VertexStream {
            stream_index: 0,
            buffer: BufferId::new(1),
            offset: 0,
        });
        command.index_buffer = Some(BufferId::new(2));
        command.params = DrawParams::Direct {
            base_vertex: 0,
            first_element: 0,
            element_count: 36,
            instance_count: 1,
        };

        command
    }

    #[test]
    pub fn structural_equality() {
        assert_eq!(command(), command());

        let mut other = command();
        other.stencil_ref = 1;

        assert_ne!(command(), other);
    }

    #[test]
    pub fn indirect_commands_are_flagged() {
        let mut indirect = command();
        indirect.params = DrawParams::Indirect {
            buffer: BufferId::new(3),
            offset: 0,
        };

        assert!(indirect.is_indirect());
        assert!(!command().is_indirect());
        assert_ne!(command(), indirect);
    }

    #[test]
    pub fn visible_draw_derives_instance_stream_flag() {
        let plain = Arc::new(command());
        let visible = VisibleDraw::new(&plain, 9, DrawSortKey::default());

        assert!(!visible.flags.contains(DrawFlags::HAS_INSTANCE_ID_STREAM));

        let mut with_stream = command();
        with_stream.instance_id_stream_index = Some(1);
        let with_stream = Arc::new(with_stream);
        let visible = VisibleDraw::new(&with_stream, 9, DrawSortKey(5));

        assert!(visible.flags.contains(DrawFlags::HAS_INSTANCE_ID_STREAM));
        assert_eq!(visible.instance_id, 9);
    }
}
