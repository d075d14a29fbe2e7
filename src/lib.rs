//! _Draw Batch_ turns per-primitive draw descriptions into a small number of
//! instanced GPU draws.
//!
//! The pipeline has three phases:
//!
//! 1. **Finalize** ([`finalize`]): visibility determination builds a
//!    [`DrawCommand`](command::DrawCommand) per visible primitive, interns its
//!    pipeline state ([`interner`]) and, for cacheable draws, collapses
//!    structurally-identical commands into refcounted buckets ([`cache`]).
//!    Finalization runs immediately, deferred across worker threads with a
//!    single deterministic join, or per-frame for dynamic draws.
//! 2. **Sort** ([`submit::sort_draws`]): an externally-supplied key orders the
//!    frame's [`VisibleDraw`](command::VisibleDraw)s so identical commands
//!    land adjacent.
//! 3. **Submit** ([`submit`]): maximal runs of identical commands merge into
//!    one instanced draw each, per-run instance identities are routed through
//!    a side buffer, and redundant state transitions are elided against a
//!    [`DrawStateCache`](submit::DrawStateCache).
//!
//! The crate never talks to a graphics API itself; renderers implement the
//! [`driver`] traits over their backend and hand them to the submission pass.
//!
//! # Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! draw-batch = "0.1"
//! ```
//!
//! Then, per frame: finalize visible primitives into commands, sort the
//! resulting draws, and submit them over your [`CommandRecorder`]
//! implementation:
//!
//! ```no_run
//! # use draw_batch::prelude::*;
//! # fn per_frame<D: Device, R: CommandRecorder>(
//! #     draws: &mut Vec<VisibleDraw>,
//! #     interner: &PipelineStateInterner,
//! #     local: &LocalPipelineSet,
//! #     pipelines: &mut PipelineObjects<'_, D>,
//! #     recorder: &mut R,
//! # ) -> Result<(), DriverError> {
//! let mut instance_ids = vec![];
//!
//! sort_draws(draws);
//! submit_draws(
//!     draws,
//!     &mut SubmitContext {
//!         instance_id_buffer: BufferId::new(1),
//!         instance_ids: &mut instance_ids,
//!         interner,
//!         local,
//!         pipelines,
//!         recorder,
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! Validation checks (unset binding slots, double releases) default to on in
//! debug builds and can be toggled at runtime with
//! [`validate::set_enabled`].

pub mod bindings;
pub mod cache;
pub mod command;
pub mod driver;
pub mod finalize;
pub mod interner;
pub mod submit;
pub mod validate;

/// Things which are used in almost every program.
pub mod prelude {
    pub use super::{
        bindings::{ShaderBindings, ShaderStage, StageLayout},
        cache::{BucketHandle, StateBucketCache},
        command::{DrawCommand, DrawParams, DrawSortKey, VertexStream, VisibleDraw},
        driver::{
            pipeline::{
                BlendMode, DepthStencilMode, PipelineState, PipelineStateBuilder, StencilMode,
            },
            BufferId, CommandRecorder, Device, DriverError, PipelineHandle, ResourceView,
            SamplerId, ShaderId, TextureId, VertexLayoutId, ViewId,
        },
        finalize::{
            join_deferred, remove_cached_draw, DeferredDrawContext, DynamicDrawContext,
            ImmediateDrawContext,
        },
        interner::{LocalPipelineSet, PipelineStateId, PipelineStateInterner},
        submit::{sort_draws, submit_draws, DrawStateCache, PipelineObjects, SubmitContext},
    };
}
