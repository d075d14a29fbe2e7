//! Content-addressed cache of finalized, cacheable draw commands
//!
//! Many static primitives produce structurally-identical draw commands frame
//! after frame. [`StateBucketCache`] collapses them: the first insertion of a
//! given content creates a bucket, every later insertion of equal content
//! bumps its refcount, and the bucket dies when the last owning primitive is
//! removed from the scene. At most one bucket exists per distinct content at
//! any time, which keeps per-frame submission cost sub-linear in primitive
//! count for mass-instanced static geometry.

use {
    crate::{command::DrawCommand, validate},
    log::{debug, warn},
    std::{collections::HashMap, sync::Arc},
};

/// Identifies a live bucket in a [`StateBucketCache`].
///
/// Carries a generation counter so a handle held past its bucket's removal is
/// detected instead of silently aliasing a recycled slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BucketHandle {
    index: u32,
    generation: u32,
}

impl BucketHandle {
    /// Returns the slot index, useful as a stable sort input while the
    /// bucket is live.
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

struct Bucket {
    command: Arc<DrawCommand>,
    ref_count: u32,
}

/// Reference-counted, content-keyed table of finalized draw commands.
#[derive(Default)]
pub struct StateBucketCache {
    free: Vec<u32>,
    generations: Vec<u32>,
    lookup: HashMap<Arc<DrawCommand>, u32>,
    slots: Vec<Option<Bucket>>,
}

impl StateBucketCache {
    /// Constructs a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `command`, or takes a reference on the existing bucket with
    /// equal structural content.
    #[profiling::function]
    pub fn find_or_add(&mut self, command: DrawCommand) -> BucketHandle {
        if let Some(&index) = self.lookup.get(&command) {
            let bucket = self.slots[index as usize].as_mut().unwrap();
            bucket.ref_count += 1;

            return BucketHandle {
                index,
                generation: self.generations[index as usize],
            };
        }

        let command = Arc::new(command);
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            self.slots.push(None);
            self.generations.push(0);
            (self.slots.len() - 1) as u32
        };

        self.slots[index as usize] = Some(Bucket {
            command: Arc::clone(&command),
            ref_count: 1,
        });
        self.lookup.insert(command, index);

        debug!("added state bucket {}", index);

        BucketHandle {
            index,
            generation: self.generations[index as usize],
        }
    }

    /// Releases one reference to a bucket, erasing it when the refcount
    /// reaches zero.
    pub fn remove(&mut self, handle: BucketHandle) {
        if !self.is_live(handle) {
            if validate::enabled() {
                panic!("removed state bucket {} more than once", handle.index);
            }

            warn!("removed state bucket {} more than once", handle.index);

            return;
        }

        let index = handle.index();
        let bucket = self.slots[index].as_mut().unwrap();
        bucket.ref_count -= 1;

        if bucket.ref_count == 0 {
            let bucket = self.slots[index].take().unwrap();
            self.lookup.remove(&bucket.command);
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.free.push(handle.index);

            debug!("evicted state bucket {}", handle.index);
        }
    }

    fn is_live(&self, handle: BucketHandle) -> bool {
        self.generations.get(handle.index()).copied() == Some(handle.generation)
            && self.slots[handle.index()].is_some()
    }

    /// Returns the command held by a live bucket.
    ///
    /// Panics on a stale handle.
    pub fn command(&self, handle: BucketHandle) -> &Arc<DrawCommand> {
        assert!(self.is_live(handle), "stale state bucket handle");

        &self.slots[handle.index()].as_ref().unwrap().command
    }

    /// Returns a live bucket's reference count, or zero for a stale handle.
    pub fn ref_count(&self, handle: BucketHandle) -> u32 {
        if !self.is_live(handle) {
            return 0;
        }

        self.slots[handle.index()].as_ref().unwrap().ref_count
    }

    /// Returns the number of live buckets.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Returns `true` when the cache holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Iterates over the live buckets as (command, refcount) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<DrawCommand>, u32)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(|bucket| (&bucket.command, bucket.ref_count))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            bindings::{ShaderBindings, ShaderStage, StageLayout},
            command::DrawParams,
            driver::BufferId,
        },
    };

    fn command(element_count: u32) -> DrawCommand {
        let mut command = DrawCommand::new(ShaderBindings::new([StageLayout::empty(
            ShaderStage::Vertex,
        )]));
        command.index_buffer = Some(BufferId::new(1));
        command.params = DrawParams::Direct {
            base_vertex: 0,
            first_element: 0,
            element_count,
            instance_count: 1,
        };

        command
    }

    #[test]
    pub fn identical_content_shares_one_bucket() {
        let mut cache = StateBucketCache::new();

        let a = cache.find_or_add(command(3));
        let b = cache.find_or_add(command(3));

        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(a), 2);
    }

    #[test]
    pub fn distinct_content_gets_distinct_buckets() {
        let mut cache = StateBucketCache::new();

        let a = cache.find_or_add(command(3));
        let b = cache.find_or_add(command(6));

        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.ref_count(a), 1);
        assert_eq!(cache.ref_count(b), 1);
    }

    #[test]
    pub fn release_symmetry() {
        let mut cache = StateBucketCache::new();

        let handles = (0..4).map(|_| cache.find_or_add(command(3))).collect::<Vec<_>>();

        assert_eq!(cache.ref_count(handles[0]), 4);

        for handle in handles {
            cache.remove(handle);
        }

        assert!(cache.is_empty());
    }

    #[test]
    pub fn removed_content_gets_a_fresh_bucket() {
        let mut cache = StateBucketCache::new();

        let old = cache.find_or_add(command(3));
        cache.remove(old);

        let new = cache.find_or_add(command(3));

        // Same content, brand-new handle: no stale-handle reuse
        assert_ne!(old, new);
        assert_eq!(cache.ref_count(old), 0);
        assert_eq!(cache.ref_count(new), 1);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    pub fn stale_remove_is_detected() {
        crate::validate::set_enabled(true);

        let mut cache = StateBucketCache::new();
        let handle = cache.find_or_add(command(3));

        cache.remove(handle);
        cache.remove(handle);
    }
}
