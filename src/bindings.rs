//! Per-stage shader-resource binding records
//!
//! A [`ShaderBindings`] value is the finalized record of every resource a draw
//! command feeds to its shaders: uniform buffers, samplers, textures/typed
//! views, and a trailing range of loose scalar bytes. The slot counts and the
//! loose-range length form a [`StageLayout`], derived once per distinct
//! (shader, vertex-factory) combination from reflection metadata and shared by
//! every record using that combination; only the slot contents vary per draw.
//!
//! Records with identical layouts are structurally equal iff every slot value
//! and every loose byte are equal, and equal records always hash identically.
//! The bucket cache and the instancing merge rely on that. Slot storage is
//! typed (`Option` per slot, loose bytes zero-initialized) so no padding or
//! uninitialized memory can leak into the comparison.

use {
    crate::{
        driver::{BufferId, ResourceView, SamplerId, TextureId, ViewId},
        validate,
    },
    log::warn,
    std::mem::size_of,
};

/// A programmable shader stage.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderStage {
    /// Returns the bit used to represent this stage in a stage mask.
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Slot counts and loose-parameter length for one shader stage.
///
/// Derived from the stage's reflection metadata; shader compilation and
/// reflection happen outside this crate.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StageLayout {
    /// The stage this layout describes.
    pub stage: ShaderStage,

    /// Number of uniform-buffer slots the stage statically expects.
    pub uniform_buffer_count: u16,

    /// Number of sampler slots the stage statically expects.
    pub sampler_count: u16,

    /// Number of texture/typed-view slots the stage statically expects.
    pub resource_count: u16,

    /// Byte length of the loose scalar-parameter range.
    pub loose_len: u16,
}

impl StageLayout {
    /// Returns the storage footprint, in bytes, this stage contributes to a
    /// binding record.
    pub const fn data_len(self) -> usize {
        self.uniform_buffer_count as usize * size_of::<Option<BufferId>>()
            + self.sampler_count as usize * size_of::<Option<SamplerId>>()
            + self.resource_count as usize * size_of::<Option<ResourceView>>()
            + self.loose_len as usize
    }

    /// A layout with no slots, useful as a starting point in tests.
    pub const fn empty(stage: ShaderStage) -> Self {
        Self {
            stage,
            uniform_buffer_count: 0,
            sampler_count: 0,
            resource_count: 0,
            loose_len: 0,
        }
    }
}

// Offsets of one stage's slots within the concatenated storage.
#[derive(Clone, Copy, Default)]
struct StageOffsets {
    uniform_buffers: usize,
    samplers: usize,
    resources: usize,
    loose: usize,
}

/// The finalized resource bindings of a draw command, one record per active
/// shader stage.
///
/// Construct with [`ShaderBindings::new`], fill each stage through
/// [`ShaderBindings::stage_mut`], then call [`ShaderBindings::finalize`]
/// before the value is frozen into a draw command.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ShaderBindings {
    stage_bits: u8,
    layouts: Vec<StageLayout>,
    uniform_buffers: Vec<Option<BufferId>>,
    samplers: Vec<Option<SamplerId>>,
    resources: Vec<Option<ResourceView>>,
    loose: Vec<u8>,
}

impl ShaderBindings {
    /// Allocates zeroed storage for the given stage layouts.
    ///
    /// Layouts must be supplied in ascending stage order with no stage
    /// repeated; the encoding never varies field order, so logically-equal
    /// binding sets always produce identical records.
    pub fn new(layouts: impl IntoIterator<Item = StageLayout>) -> Self {
        let layouts = layouts.into_iter().collect::<Vec<_>>();

        let mut stage_bits = 0u8;
        let mut uniform_buffers = 0;
        let mut samplers = 0;
        let mut resources = 0;
        let mut loose = 0;

        for layout in &layouts {
            let bit = layout.stage.bit();
            assert!(
                stage_bits < bit,
                "stage layouts must be in ascending order with no repeats"
            );
            stage_bits |= bit;

            uniform_buffers += layout.uniform_buffer_count as usize;
            samplers += layout.sampler_count as usize;
            resources += layout.resource_count as usize;
            loose += layout.loose_len as usize;
        }

        Self {
            stage_bits,
            layouts,
            uniform_buffers: vec![None; uniform_buffers],
            samplers: vec![None; samplers],
            resources: vec![None; resources],
            loose: vec![0; loose],
        }
    }

    /// Returns the mask of stages this record covers.
    pub fn stage_bits(&self) -> u8 {
        self.stage_bits
    }

    /// Returns the stage layouts, in ascending stage order.
    pub fn layouts(&self) -> &[StageLayout] {
        &self.layouts
    }

    fn offsets(&self, stage: ShaderStage) -> Option<(usize, StageOffsets)> {
        let mut offsets = StageOffsets::default();

        for (idx, layout) in self.layouts.iter().enumerate() {
            if layout.stage == stage {
                return Some((idx, offsets));
            }

            offsets.uniform_buffers += layout.uniform_buffer_count as usize;
            offsets.samplers += layout.sampler_count as usize;
            offsets.resources += layout.resource_count as usize;
            offsets.loose += layout.loose_len as usize;
        }

        None
    }

    /// Returns a read-only view of one stage's slots, or `None` if the stage
    /// is not part of this record.
    pub fn stage(&self, stage: ShaderStage) -> Option<StageBindings<'_>> {
        let (idx, offsets) = self.offsets(stage)?;
        let layout = self.layouts[idx];

        Some(StageBindings {
            layout,
            uniform_buffers: &self.uniform_buffers[offsets.uniform_buffers
                ..offsets.uniform_buffers + layout.uniform_buffer_count as usize],
            samplers: &self.samplers
                [offsets.samplers..offsets.samplers + layout.sampler_count as usize],
            resources: &self.resources
                [offsets.resources..offsets.resources + layout.resource_count as usize],
            loose: &self.loose[offsets.loose..offsets.loose + layout.loose_len as usize],
        })
    }

    /// Returns a writer for one stage's slots.
    ///
    /// Panics if the stage is not part of this record.
    pub fn stage_mut(&mut self, stage: ShaderStage) -> StageBindingsMut<'_> {
        let (idx, offsets) = self
            .offsets(stage)
            .expect("stage is not part of this binding record");
        let layout = self.layouts[idx];

        StageBindingsMut {
            uniform_buffers: &mut self.uniform_buffers[offsets.uniform_buffers
                ..offsets.uniform_buffers + layout.uniform_buffer_count as usize],
            samplers: &mut self.samplers
                [offsets.samplers..offsets.samplers + layout.sampler_count as usize],
            resources: &mut self.resources
                [offsets.resources..offsets.resources + layout.resource_count as usize],
            loose: &mut self.loose[offsets.loose..offsets.loose + layout.loose_len as usize],
        }
    }

    /// Checks that every statically-required slot was written.
    ///
    /// An unset slot is a programmer error: with [validation] enabled this
    /// panics naming the stage and slot, otherwise a warning is logged and the
    /// draw proceeds with undefined contents for that slot.
    ///
    /// [validation]: crate::validate
    pub fn finalize(&self) {
        let mut unset = None;

        'outer: for layout in &self.layouts {
            let stage = self.stage(layout.stage).unwrap();

            for (slot, value) in stage.uniform_buffers.iter().enumerate() {
                if value.is_none() {
                    unset = Some((layout.stage, "uniform buffer", slot));
                    break 'outer;
                }
            }

            for (slot, value) in stage.samplers.iter().enumerate() {
                if value.is_none() {
                    unset = Some((layout.stage, "sampler", slot));
                    break 'outer;
                }
            }

            for (slot, value) in stage.resources.iter().enumerate() {
                if value.is_none() {
                    unset = Some((layout.stage, "resource", slot));
                    break 'outer;
                }
            }
        }

        if let Some((stage, kind, slot)) = unset {
            if validate::enabled() {
                panic!(
                    "{:?} shader never set {} at slot {}; this can hang the GPU depending on how \
                     the shader uses it",
                    stage, kind, slot
                );
            }

            warn!("{:?} shader never set {} at slot {}", stage, kind, slot);
        }
    }
}

/// Read-only view of one stage's slots.
#[derive(Clone, Copy, Debug)]
pub struct StageBindings<'a> {
    /// The layout this view was created from.
    pub layout: StageLayout,

    /// Uniform-buffer slot contents.
    pub uniform_buffers: &'a [Option<BufferId>],

    /// Sampler slot contents.
    pub samplers: &'a [Option<SamplerId>],

    /// Texture/typed-view slot contents.
    pub resources: &'a [Option<ResourceView>],

    /// Loose scalar-parameter bytes.
    pub loose: &'a [u8],
}

/// Writer for one stage's slots.
pub struct StageBindingsMut<'a> {
    uniform_buffers: &'a mut [Option<BufferId>],
    samplers: &'a mut [Option<SamplerId>],
    resources: &'a mut [Option<ResourceView>],
    loose: &'a mut [u8],
}

impl StageBindingsMut<'_> {
    /// Stores a uniform buffer in the given slot.
    pub fn set_uniform_buffer(&mut self, slot: usize, buffer: BufferId) {
        self.uniform_buffers[slot] = Some(buffer);
    }

    /// Stores a sampler in the given slot.
    pub fn set_sampler(&mut self, slot: usize, sampler: SamplerId) {
        self.samplers[slot] = Some(sampler);
    }

    /// Stores a raw texture in the given resource slot.
    pub fn set_texture(&mut self, slot: usize, texture: TextureId) {
        self.resources[slot] = Some(ResourceView::Texture(texture));
    }

    /// Stores a typed view in the given resource slot.
    pub fn set_view(&mut self, slot: usize, view: ViewId) {
        self.resources[slot] = Some(ResourceView::Typed(view));
    }

    /// Copies loose scalar bytes into the record at `offset`.
    pub fn write_loose(&mut self, offset: usize, data: &[u8]) {
        self.loose[offset..offset + data.len()].copy_from_slice(data);
    }
}
