//! Turning half-built commands into finalized, interned draw commands
//!
//! Visibility determination hands each candidate primitive to one of three
//! contexts. A primitive with no valid material/shader combination simply
//! never reaches a context; skipping is not an error.
//!
//! - [`ImmediateDrawContext`] inserts straight into the shared
//!   [`StateBucketCache`]; callers must serialize these calls per cache,
//!   typically by finalizing from one controlling thread.
//! - [`DeferredDrawContext`] buffers finalized commands worker-locally and
//!   ships them over a channel, so thousands of primitives can be processed
//!   in parallel without touching a lock; a single [`join_deferred`] pass
//!   then performs every shared-table write in a deterministic order.
//! - [`DynamicDrawContext`] serves per-frame dynamic draws: local pipeline
//!   ids, a frame arena instead of the bucket cache.

use {
    crate::{
        cache::{BucketHandle, StateBucketCache},
        command::{DrawCommand, DrawSortKey, VisibleDraw},
        driver::pipeline::PipelineState,
        interner::{LocalPipelineSet, PipelineStateInterner},
    },
    crossbeam_channel::{Receiver, Sender},
    log::debug,
    std::sync::Arc,
};

/// Finalizes commands directly into the shared cache.
///
/// Calls must not race other insertions into the same cache; the borrow on
/// the cache enforces this within one thread, and callers are responsible for
/// not finalizing the same cache from two threads at once.
pub struct ImmediateDrawContext<'a> {
    cache: &'a mut StateBucketCache,
    interner: &'a PipelineStateInterner,
}

impl<'a> ImmediateDrawContext<'a> {
    /// Constructs a context over the shared interner and cache.
    pub fn new(interner: &'a PipelineStateInterner, cache: &'a mut StateBucketCache) -> Self {
        Self { cache, interner }
    }

    /// Resolves a persistent pipeline id for `state`, validates and freezes
    /// `command`, and inserts it into the cache.
    ///
    /// Each call takes one reference on both the interner entry and the
    /// bucket; pair it with [`remove_cached_draw`] when the owning primitive
    /// leaves the scene.
    pub fn finalize(&mut self, mut command: DrawCommand, state: &PipelineState) -> BucketHandle {
        command.pipeline_id = self.interner.get_or_create(state);
        command.bindings.finalize();

        self.cache.find_or_add(command)
    }

    /// Returns the finalized command behind a handle produced by this
    /// context's cache.
    pub fn command(&self, handle: BucketHandle) -> &Arc<DrawCommand> {
        self.cache.command(handle)
    }
}

/// Releases a cached draw: one bucket reference and, through the command's
/// pipeline id, one interner reference.
pub fn remove_cached_draw(
    interner: &PipelineStateInterner,
    cache: &mut StateBucketCache,
    handle: BucketHandle,
) {
    let pipeline_id = cache.command(handle).pipeline_id;
    cache.remove(handle);
    interner.release(pipeline_id);
}

struct PendingDraw {
    command: DrawCommand,
    primitive: u32,
    state: PipelineState,
}

/// A worker-local buffer of finalized-but-uninserted draws.
///
/// Workers own their context exclusively during the parallel phase, then ship
/// it to the join phase with [`Self::send`]. The extra buffered memory buys
/// zero lock contention while primitives are processed concurrently.
pub struct DeferredDrawContext {
    pending: Vec<PendingDraw>,
    worker: u32,
}

impl DeferredDrawContext {
    /// Constructs a buffer for the given worker index.
    ///
    /// Worker indices define the join order and must be unique per frame.
    pub fn new(worker: u32) -> Self {
        Self {
            pending: vec![],
            worker,
        }
    }

    /// Validates `command` and buffers it for the join phase.
    ///
    /// Returns a placeholder: the position of the command within this
    /// worker's buffer. The matching [`BucketHandle`] is produced later by
    /// [`join_deferred`].
    pub fn finalize(
        &mut self,
        primitive: u32,
        command: DrawCommand,
        state: &PipelineState,
    ) -> usize {
        command.bindings.finalize();

        self.pending.push(PendingDraw {
            command,
            primitive,
            state: *state,
        });

        self.pending.len() - 1
    }

    /// Returns the number of buffered draws.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ships this buffer to the join phase.
    pub fn send(self, tx: &Sender<DeferredDrawContext>) {
        tx.send(self).unwrap();
    }
}

/// One joined draw: the originating primitive and its bucket.
#[derive(Clone, Copy, Debug)]
pub struct JoinedDraw {
    /// Bucket holding the finalized command.
    pub bucket: BucketHandle,

    /// Originating primitive index, as passed to
    /// [`DeferredDrawContext::finalize`].
    pub primitive: u32,

    /// The worker that produced the draw.
    pub worker: u32,
}

/// Drains every buffered worker context and performs the shared-table
/// writes.
///
/// Must run after all producer workers have sent their contexts and dropped
/// their senders. Batches are processed in ascending worker order, and each
/// batch in finalize order, so insertion into the cache (and therefore the
/// merge-run boundaries at submission) is reproducible across runs for a
/// given scene state.
#[profiling::function]
pub fn join_deferred(
    rx: &Receiver<DeferredDrawContext>,
    interner: &PipelineStateInterner,
    cache: &mut StateBucketCache,
) -> Vec<JoinedDraw> {
    let mut batches = rx.try_iter().collect::<Vec<_>>();
    batches.sort_by_key(|batch| batch.worker);

    let mut joined = vec![];

    for batch in batches {
        let worker = batch.worker;

        debug!("joining {} draws from worker {}", batch.pending.len(), worker);

        for pending in batch.pending {
            let mut command = pending.command;
            command.pipeline_id = interner.get_or_create(&pending.state);

            joined.push(JoinedDraw {
                bucket: cache.find_or_add(command),
                primitive: pending.primitive,
                worker,
            });
        }
    }

    joined
}

/// Finalizes per-frame dynamic draws against a local pipeline set.
///
/// Commands live in a frame arena owned by this context and are discarded at
/// frame end along with the local set; nothing here touches the shared
/// tables.
pub struct DynamicDrawContext<'a> {
    commands: Vec<Arc<DrawCommand>>,
    local: &'a mut LocalPipelineSet,
}

impl<'a> DynamicDrawContext<'a> {
    /// Constructs a context over the frame's local pipeline set.
    pub fn new(local: &'a mut LocalPipelineSet) -> Self {
        Self {
            commands: vec![],
            local,
        }
    }

    /// Resolves a local pipeline id, validates and freezes `command`, and
    /// returns a visible draw referencing it.
    pub fn finalize(
        &mut self,
        mut command: DrawCommand,
        state: &PipelineState,
        instance_id: u32,
        sort_key: DrawSortKey,
    ) -> VisibleDraw {
        command.pipeline_id = self.local.get_or_create(state);
        command.bindings.finalize();

        let command = Arc::new(command);
        self.commands.push(Arc::clone(&command));

        VisibleDraw::new(&command, instance_id, sort_key)
    }

    /// Returns the number of commands in the frame arena.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` when the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
