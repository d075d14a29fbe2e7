//! Instanced submission of sorted visible draws
//!
//! [`submit_draws`] walks a sorted slice of [`VisibleDraw`]s and merges each
//! maximal run of structurally-identical commands into a single instanced
//! draw. The instance identities of a merged run are written contiguously
//! into a side buffer, which is bound at the command's instance-id stream
//! slot so the shader can recover per-instance data despite the merge.
//!
//! Between draws a [`DrawStateCache`] elides redundant pipeline, stencil,
//! vertex-stream, index-buffer and resource-binding transitions, so a run of
//! near-identical commands costs close to one state change plus one draw.

use {
    crate::{
        command::{DrawParams, VisibleDraw, MAX_VERTEX_STREAMS},
        driver::{BufferId, CommandRecorder, Device, DriverError, PipelineHandle},
        interner::{LocalPipelineSet, PipelineStateId, PipelineStateInterner},
    },
    log::trace,
    std::{collections::HashMap, mem::size_of, sync::Arc},
};

/// Sorts visible draws into submission order.
///
/// The keys are produced by an external comparator policy; all the merge pass
/// requires is that structurally-identical commands end up adjacent, which
/// any key derived from the command content satisfies. The sort is stable so
/// equal keys keep their visibility order.
#[profiling::function]
pub fn sort_draws(draws: &mut [VisibleDraw]) {
    draws.sort_by_key(|draw| draw.sort_key);
}

/// Tracks the state most recently applied to a [`CommandRecorder`], so the
/// submission pass can skip transitions the stream already carries.
///
/// One cache per recorded stream: parallel recorders each start from a fresh
/// cache, since no prior state exists on their streams.
#[derive(Default)]
pub struct DrawStateCache {
    bindings: Option<crate::bindings::ShaderBindings>,
    index_buffer: Option<BufferId>,
    pipeline_id: PipelineStateId,
    stencil_ref: Option<u32>,
    vertex_streams: [Option<(BufferId, u32)>; MAX_VERTEX_STREAMS],
}

impl DrawStateCache {
    /// Constructs a cache with nothing applied.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lazily-created backend pipeline objects, one per interned pipeline state.
///
/// The first submitted draw using a given id pays the creation cost; every
/// later draw reuses the handle.
pub struct PipelineObjects<'a, D> {
    device: &'a D,
    pipelines: HashMap<PipelineStateId, PipelineHandle>,
}

impl<'a, D> PipelineObjects<'a, D>
where
    D: Device,
{
    /// Constructs an empty table over `device`.
    pub fn new(device: &'a D) -> Self {
        Self {
            device,
            pipelines: HashMap::new(),
        }
    }

    fn get(
        &mut self,
        id: PipelineStateId,
        interner: &PipelineStateInterner,
        local: &LocalPipelineSet,
    ) -> Result<PipelineHandle, DriverError> {
        if let Some(&pipeline) = self.pipelines.get(&id) {
            return Ok(pipeline);
        }

        let state = interner.resolve(id, local);
        let pipeline = self.device.create_pipeline(&state)?;

        trace!("created pipeline object for state {}", id.index());

        self.pipelines.insert(id, pipeline);

        Ok(pipeline)
    }

    /// Forgets handles keyed by frame-local ids.
    ///
    /// Must run at frame end: a local id minted next frame may refer to
    /// different state.
    pub fn end_frame(&mut self) {
        self.pipelines.retain(|id, _| !id.is_local());
    }

    /// Returns the number of cached pipeline objects.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns `true` when no pipeline objects are cached.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Everything [`submit_draws`] needs besides the draws themselves.
pub struct SubmitContext<'a, 'b, D, R> {
    /// GPU buffer the contents of `instance_ids` will be uploaded to before
    /// the recorded stream executes.
    pub instance_id_buffer: BufferId,

    /// Staging storage for per-run instance identities; appended to, never
    /// cleared, so several passes may share one upload.
    pub instance_ids: &'a mut Vec<u32>,

    /// Shared pipeline-state table for resolving persistent ids.
    pub interner: &'a PipelineStateInterner,

    /// Frame-local table for resolving dynamic-draw ids.
    pub local: &'a LocalPipelineSet,

    /// Backend pipeline objects.
    pub pipelines: &'a mut PipelineObjects<'b, D>,

    /// Destination command stream.
    pub recorder: &'a mut R,
}

/// Submits every draw in `draws`, merging runs and eliding redundant state.
///
/// `draws` must already be in submission order (see [`sort_draws`]).
#[profiling::function]
pub fn submit_draws<D, R>(
    draws: &[VisibleDraw],
    context: &mut SubmitContext<'_, '_, D, R>,
) -> Result<(), DriverError>
where
    D: Device,
    R: CommandRecorder,
{
    let mut cache = DrawStateCache::new();

    submit_draws_range(draws, 0..draws.len(), context, &mut cache)
}

/// Submits the draws at `range`, for splitting one sorted slice across
/// parallel recorders.
///
/// A run spanning a range boundary is split; each side submits its own
/// instanced draw. `cache` must reflect what is already applied to the
/// recorder's stream, which for a fresh stream is [`DrawStateCache::new`].
#[profiling::function]
pub fn submit_draws_range<D, R>(
    draws: &[VisibleDraw],
    range: std::ops::Range<usize>,
    context: &mut SubmitContext<'_, '_, D, R>,
    cache: &mut DrawStateCache,
) -> Result<(), DriverError>
where
    D: Device,
    R: CommandRecorder,
{
    let draws = &draws[range];
    let mut next = 0;

    while next < draws.len() {
        let visible = &draws[next];
        let mut run_len = 1;

        // An indirect command's count is GPU-side, so it never merges
        if !visible.command.is_indirect() {
            while next + run_len < draws.len() {
                let candidate = &draws[next + run_len].command;

                if !Arc::ptr_eq(&visible.command, candidate) && visible.command != *candidate {
                    break;
                }

                run_len += 1;
            }
        }

        let first_instance_slot = context.instance_ids.len() as u32;

        context
            .instance_ids
            .extend(draws[next..next + run_len].iter().map(|draw| draw.instance_id));

        record_run(visible, run_len as u32, first_instance_slot, context, cache)?;

        next += run_len;
    }

    Ok(())
}

fn record_run<D, R>(
    visible: &VisibleDraw,
    run_len: u32,
    first_instance_slot: u32,
    context: &mut SubmitContext<'_, '_, D, R>,
    cache: &mut DrawStateCache,
) -> Result<(), DriverError>
where
    D: Device,
    R: CommandRecorder,
{
    let command = &*visible.command;

    if cache.pipeline_id != command.pipeline_id {
        let pipeline = context
            .pipelines
            .get(command.pipeline_id, context.interner, context.local)?;
        context.recorder.bind_pipeline(pipeline);
        cache.pipeline_id = command.pipeline_id;

        // Resource bindings do not survive a pipeline change
        cache.bindings = None;
    }

    if cache.stencil_ref != Some(command.stencil_ref) {
        context.recorder.set_stencil_ref(command.stencil_ref);
        cache.stencil_ref = Some(command.stencil_ref);
    }

    for stream in &command.vertex_streams {
        let (buffer, offset) = if Some(stream.stream_index) == command.instance_id_stream_index {
            (
                context.instance_id_buffer,
                first_instance_slot * size_of::<u32>() as u32,
            )
        } else {
            (stream.buffer, stream.offset)
        };

        let slot = &mut cache.vertex_streams[stream.stream_index as usize];

        if *slot != Some((buffer, offset)) {
            context
                .recorder
                .bind_vertex_buffer(stream.stream_index, buffer, offset);
            *slot = Some((buffer, offset));
        }
    }

    if cache.bindings.as_ref() != Some(&command.bindings) {
        context.recorder.bind_shader_resources(&command.bindings);
        cache.bindings = Some(command.bindings.clone());
    }

    if let Some(index_buffer) = command.index_buffer {
        if cache.index_buffer != Some(index_buffer) {
            context.recorder.bind_index_buffer(index_buffer);
            cache.index_buffer = Some(index_buffer);
        }
    }

    trace!(
        "submitting run of {} draws (pipeline state {})",
        run_len,
        command.pipeline_id.index()
    );

    match command.params {
        DrawParams::Direct {
            base_vertex,
            first_element,
            element_count,
            instance_count,
        } => {
            let instance_count = instance_count * run_len;

            if command.index_buffer.is_some() {
                context
                    .recorder
                    .draw_indexed(element_count, instance_count, first_element, base_vertex);
            } else {
                let first_vertex = (base_vertex as u32).wrapping_add(first_element);
                context.recorder.draw(element_count, instance_count, first_vertex);
            }
        }
        DrawParams::Indirect { buffer, offset } => {
            if command.index_buffer.is_some() {
                context.recorder.draw_indexed_indirect(buffer, offset);
            } else {
                context.recorder.draw_indirect(buffer, offset);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            bindings::{ShaderBindings, ShaderStage, StageLayout},
            command::{DrawCommand, DrawSortKey, VertexStream},
            driver::{pipeline::PipelineState, ShaderId, VertexLayoutId},
        },
        std::cell::Cell,
    };

    #[derive(Default)]
    struct Recording {
        draws: Vec<(u32, u32, u32)>,
        index_binds: u32,
        indirect_draws: Vec<(BufferId, u64)>,
        pipeline_binds: u32,
        resource_binds: u32,
        stencil_sets: u32,
        vertex_binds: Vec<(u32, BufferId, u32)>,
    }

    impl CommandRecorder for Recording {
        fn bind_pipeline(&mut self, _pipeline: PipelineHandle) {
            self.pipeline_binds += 1;
        }

        fn set_stencil_ref(&mut self, _stencil_ref: u32) {
            self.stencil_sets += 1;
        }

        fn bind_vertex_buffer(&mut self, stream_index: u32, buffer: BufferId, offset: u32) {
            self.vertex_binds.push((stream_index, buffer, offset));
        }

        fn bind_index_buffer(&mut self, _buffer: BufferId) {
            self.index_binds += 1;
        }

        fn bind_shader_resources(&mut self, _bindings: &ShaderBindings) {
            self.resource_binds += 1;
        }

        fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) {
            self.draws.push((vertex_count, instance_count, first_vertex));
        }

        fn draw_indexed(
            &mut self,
            index_count: u32,
            instance_count: u32,
            first_index: u32,
            _base_vertex: i32,
        ) {
            self.draws.push((index_count, instance_count, first_index));
        }

        fn draw_indirect(&mut self, buffer: BufferId, offset: u64) {
            self.indirect_draws.push((buffer, offset));
        }

        fn draw_indexed_indirect(&mut self, buffer: BufferId, offset: u64) {
            self.indirect_draws.push((buffer, offset));
        }
    }

    #[derive(Default)]
    struct NullDevice {
        created: Cell<u64>,
    }

    impl Device for NullDevice {
        fn create_pipeline(&self, _state: &PipelineState) -> Result<PipelineHandle, DriverError> {
            let created = self.created.get() + 1;
            self.created.set(created);

            Ok(PipelineHandle::new(created))
        }
    }

    fn state(shader: u64) -> PipelineState {
        PipelineState::new(ShaderId::new(shader), VertexLayoutId::new(1)).build()
    }

    fn command(interner: &PipelineStateInterner, shader: u64, element_count: u32) -> DrawCommand {
        let mut command = DrawCommand::new(ShaderBindings::new([StageLayout::empty(
            ShaderStage::Vertex,
        )]));
        command.pipeline_id = interner.get_or_create(&state(shader));
        command.vertex_streams.push(VertexStream {
            stream_index: 0,
            buffer: BufferId::new(10),
            offset: 0,
        });
        command.vertex_streams.push(VertexStream {
            stream_index: 1,
            buffer: BufferId::new(0),
            offset: 0,
        });
        command.instance_id_stream_index = Some(1);
        command.index_buffer = Some(BufferId::new(20));
        command.params = DrawParams::Direct {
            base_vertex: 0,
            first_element: 0,
            element_count,
            instance_count: 1,
        };

        command
    }

    struct Harness {
        device: NullDevice,
        instance_ids: Vec<u32>,
        interner: PipelineStateInterner,
        local: LocalPipelineSet,
        recording: Recording,
    }

    impl Harness {
        fn new() -> Self {
            let _ = pretty_env_logger::try_init();

            Self {
                device: NullDevice::default(),
                instance_ids: vec![],
                interner: PipelineStateInterner::new(),
                local: LocalPipelineSet::new(),
                recording: Recording::default(),
            }
        }

        fn submit(&mut self, draws: &[VisibleDraw]) {
            let mut pipelines = PipelineObjects::new(&self.device);
            let mut context = SubmitContext {
                instance_id_buffer: BufferId::new(99),
                instance_ids: &mut self.instance_ids,
                interner: &self.interner,
                local: &self.local,
                pipelines: &mut pipelines,
                recorder: &mut self.recording,
            };

            submit_draws(draws, &mut context).unwrap();
        }
    }

    fn visible(command: &Arc<DrawCommand>, instance_id: u32) -> VisibleDraw {
        VisibleDraw::new(command, instance_id, DrawSortKey(instance_id as u64))
    }

    #[test]
    pub fn identical_draws_merge_into_one_instanced_draw() {
        let mut harness = Harness::new();
        let command = Arc::new(command(&harness.interner, 1, 36));
        let draws = (0..4).map(|id| visible(&command, id)).collect::<Vec<_>>();

        harness.submit(&draws);

        assert_eq!(harness.recording.draws, vec![(36, 4, 0)]);
        assert_eq!(harness.recording.pipeline_binds, 1);
        assert_eq!(harness.recording.stencil_sets, 1);
        assert_eq!(harness.recording.resource_binds, 1);
        assert_eq!(harness.recording.index_binds, 1);
        assert_eq!(harness.instance_ids, vec![0, 1, 2, 3]);
    }

    #[test]
    pub fn equal_content_from_different_allocations_still_merges() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let b = Arc::new(command(&harness.interner, 1, 36));

        harness.submit(&[visible(&a, 0), visible(&b, 1)]);

        assert_eq!(harness.recording.draws, vec![(36, 2, 0)]);
    }

    #[test]
    pub fn mixed_content_splits_runs_and_elides_shared_state() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let mut other = command(&harness.interner, 1, 36);
        other.params = DrawParams::Direct {
            base_vertex: 0,
            first_element: 36,
            element_count: 12,
            instance_count: 1,
        };
        let b = Arc::new(other);

        let draws = vec![
            visible(&a, 0),
            visible(&a, 1),
            visible(&a, 2),
            visible(&b, 3),
        ];

        harness.submit(&draws);

        // Two runs, one pipeline: state shared across the run boundary is
        // not rebound
        assert_eq!(harness.recording.draws, vec![(36, 3, 0), (12, 1, 36)]);
        assert_eq!(harness.recording.pipeline_binds, 1);
        assert_eq!(harness.recording.stencil_sets, 1);
        assert_eq!(harness.recording.index_binds, 1);
        assert_eq!(harness.instance_ids, vec![0, 1, 2, 3]);
    }

    #[test]
    pub fn instance_id_stream_rebinds_per_run() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let mut other = command(&harness.interner, 1, 36);
        other.stencil_ref = 1;
        let b = Arc::new(other);

        harness.submit(&[visible(&a, 7), visible(&a, 8), visible(&b, 9)]);

        let instance_binds = harness
            .recording
            .vertex_binds
            .iter()
            .filter(|(_, buffer, _)| *buffer == BufferId::new(99))
            .collect::<Vec<_>>();

        // First run starts at slot 0, second at slot 2 (byte offset 8)
        assert_eq!(instance_binds, vec![&(1, BufferId::new(99), 0), &(1, BufferId::new(99), 8)]);
        assert_eq!(harness.instance_ids, vec![7, 8, 9]);
        assert_eq!(harness.recording.stencil_sets, 2);
    }

    #[test]
    pub fn pipeline_changes_invalidate_bindings_only() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let b = Arc::new(command(&harness.interner, 2, 36));

        harness.submit(&[visible(&a, 0), visible(&b, 1)]);

        assert_eq!(harness.recording.pipeline_binds, 2);
        assert_eq!(harness.recording.resource_binds, 2);
        assert_eq!(harness.recording.stencil_sets, 1);
        assert_eq!(harness.recording.index_binds, 1);
        assert_eq!(harness.device.created.get(), 2);
    }

    #[test]
    pub fn pipeline_objects_are_created_once_per_state() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let b = Arc::new(command(&harness.interner, 2, 12));

        let draws = vec![visible(&a, 0), visible(&b, 1), visible(&a, 2)];

        harness.submit(&draws);

        assert_eq!(harness.device.created.get(), 2);
        assert_eq!(harness.recording.pipeline_binds, 3);
    }

    #[test]
    pub fn indirect_draws_never_merge() {
        let mut harness = Harness::new();
        let mut indirect = command(&harness.interner, 1, 0);
        indirect.params = DrawParams::Indirect {
            buffer: BufferId::new(50),
            offset: 0,
        };
        let indirect = Arc::new(indirect);

        harness.submit(&[visible(&indirect, 0), visible(&indirect, 1)]);

        assert_eq!(
            harness.recording.indirect_draws,
            vec![(BufferId::new(50), 0), (BufferId::new(50), 0)]
        );
        assert!(harness.recording.draws.is_empty());
    }

    #[test]
    pub fn range_submission_splits_runs_at_the_boundary() {
        let mut harness = Harness::new();
        let command = Arc::new(command(&harness.interner, 1, 36));
        let draws = (0..4).map(|id| visible(&command, id)).collect::<Vec<_>>();

        let mut pipelines = PipelineObjects::new(&harness.device);
        let mut context = SubmitContext {
            instance_id_buffer: BufferId::new(99),
            instance_ids: &mut harness.instance_ids,
            interner: &harness.interner,
            local: &harness.local,
            pipelines: &mut pipelines,
            recorder: &mut harness.recording,
        };

        let mut first = DrawStateCache::new();
        submit_draws_range(&draws, 0..2, &mut context, &mut first).unwrap();

        let mut second = DrawStateCache::new();
        submit_draws_range(&draws, 2..4, &mut context, &mut second).unwrap();

        assert_eq!(harness.recording.draws, vec![(36, 2, 0), (36, 2, 0)]);

        // Each range starts from a fresh stream, so shared state rebinds
        assert_eq!(harness.recording.pipeline_binds, 2);
    }

    #[test]
    pub fn sort_brings_identical_content_adjacent() {
        let mut harness = Harness::new();
        let a = Arc::new(command(&harness.interner, 1, 36));
        let b = Arc::new(command(&harness.interner, 1, 12));

        let mut draws = vec![
            VisibleDraw::new(&a, 0, DrawSortKey(1)),
            VisibleDraw::new(&b, 1, DrawSortKey(2)),
            VisibleDraw::new(&a, 2, DrawSortKey(1)),
        ];

        sort_draws(&mut draws);
        harness.submit(&draws);

        assert_eq!(harness.recording.draws, vec![(36, 2, 0), (12, 1, 0)]);

        // Stable sort keeps visibility order within equal keys
        assert_eq!(harness.instance_ids, vec![0, 2, 1]);
    }

    #[test]
    pub fn local_pipeline_objects_are_dropped_at_frame_end() {
        let harness = Harness::new();
        let device = NullDevice::default();
        let mut pipelines = PipelineObjects::new(&device);

        let mut local = LocalPipelineSet::new();
        let persistent = harness.interner.get_or_create(&state(1));
        let frame_local = local.get_or_create(&state(2));

        pipelines.get(persistent, &harness.interner, &local).unwrap();
        pipelines.get(frame_local, &harness.interner, &local).unwrap();

        assert_eq!(pipelines.len(), 2);

        pipelines.end_frame();

        assert_eq!(pipelines.len(), 1);
    }
}
