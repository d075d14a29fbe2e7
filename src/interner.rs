//! Pipeline-state interning
//!
//! Maps immutable [`PipelineState`] values to stable small ids so that later
//! structural-equality checks on draw commands reduce to an id comparison.
//! Two tables share the contract "identical state resolves to the identical
//! id within the same table":
//!
//! - [`PipelineStateInterner`]: the process-wide, reference-counted table
//!   backing cacheable/static draws. Optimized for the common case where the
//!   id already exists: lookups take a shared read lock and bump an atomic
//!   refcount; only a genuine miss or a release upgrades to a write lock.
//! - [`LocalPipelineSet`]: a per-frame table with no locking and no
//!   refcounts, used by dynamic draws. Ids minted from it die with the set
//!   and must never be persisted.

use {
    crate::{driver::pipeline::PipelineState, validate},
    log::{debug, warn},
    parking_lot::{RwLock, RwLockUpgradableReadGuard},
    std::{
        collections::HashMap,
        sync::atomic::{AtomicU32, Ordering},
    },
};

const VALID_BIT: u32 = 1 << 31;
const LOCAL_BIT: u32 = 1 << 30;
const INDEX_MASK: u32 = LOCAL_BIT - 1;

/// A tagged handle to interned pipeline state: validity bit, origin bit
/// (persistent vs. local-to-frame) and a 30-bit table index.
///
/// Owns no memory. A persistent-origin id stays valid until released and its
/// table entry's refcount reaches zero; a local-origin id is valid only for
/// the frame that produced its [`LocalPipelineSet`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PipelineStateId(u32);

impl PipelineStateId {
    /// The default, invalid id.
    pub const INVALID: Self = Self(0);

    fn persistent(index: u32) -> Self {
        assert!(index <= INDEX_MASK, "persistent pipeline state table overflow");

        Self(VALID_BIT | index)
    }

    fn local(index: u32) -> Self {
        assert!(index <= INDEX_MASK, "one-frame pipeline state table overflow");

        Self(VALID_BIT | LOCAL_BIT | index)
    }

    /// Returns `true` for ids minted by either table.
    pub const fn is_valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    /// Returns `true` for ids minted by a [`LocalPipelineSet`].
    pub const fn is_local(self) -> bool {
        self.0 & LOCAL_BIT != 0
    }

    /// Returns the table index this id refers to.
    pub const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

impl Default for PipelineStateId {
    fn default() -> Self {
        Self::INVALID
    }
}

struct Entry {
    ref_count: AtomicU32,
    state: PipelineState,
}

#[derive(Default)]
struct Table {
    free: Vec<u32>,
    lookup: HashMap<PipelineState, u32>,
    slots: Vec<Option<Entry>>,
}

/// The process-wide, reference-counted pipeline-state table.
///
/// Create one per renderer and tear it down with the renderer; entries live
/// until every [`get_or_create`] call has been paired with a [`release`].
///
/// [`get_or_create`]: Self::get_or_create
/// [`release`]: Self::release
#[derive(Default)]
pub struct PipelineStateInterner {
    table: RwLock<Table>,
}

impl PipelineStateInterner {
    /// Constructs a new, empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `state`, interning it on first use.
    ///
    /// Every call holds one reference; pair each with a [`Self::release`].
    #[profiling::function]
    pub fn get_or_create(&self, state: &PipelineState) -> PipelineStateId {
        let table = self.table.upgradable_read();

        if let Some(&index) = table.lookup.get(state) {
            let entry = table.slots[index as usize].as_ref().unwrap();
            entry.ref_count.fetch_add(1, Ordering::Relaxed);

            return PipelineStateId::persistent(index);
        }

        // Upgradable holders exclude writers, so the miss still holds after
        // the upgrade.
        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        let index = if let Some(index) = table.free.pop() {
            index
        } else {
            table.slots.push(None);
            (table.slots.len() - 1) as u32
        };

        table.slots[index as usize] = Some(Entry {
            ref_count: AtomicU32::new(1),
            state: *state,
        });
        table.lookup.insert(*state, index);

        debug!("interned pipeline state {}", index);

        PipelineStateId::persistent(index)
    }

    /// Releases one reference to `id`, erasing the entry when the last
    /// reference goes away.
    pub fn release(&self, id: PipelineStateId) {
        assert!(id.is_valid() && !id.is_local());

        let mut table = self.table.write();
        let index = id.index();
        let ref_count = match table.slots.get(index).and_then(Option::as_ref) {
            Some(entry) => entry.ref_count.fetch_sub(1, Ordering::Relaxed),
            None => {
                if validate::enabled() {
                    panic!("released pipeline state id {} more than once", index);
                }

                warn!("released pipeline state id {} more than once", index);

                return;
            }
        };

        if ref_count == 1 {
            let entry = table.slots[index].take().unwrap();
            table.lookup.remove(&entry.state);
            table.free.push(index as u32);

            debug!("evicted pipeline state {}", index);
        }
    }

    /// Returns the state behind a persistent id, if it is still interned.
    pub fn get(&self, id: PipelineStateId) -> Option<PipelineState> {
        if !id.is_valid() || id.is_local() {
            return None;
        }

        let table = self.table.read();

        table
            .slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|entry| entry.state)
    }

    /// Resolves any valid id through this table or the frame's local set.
    ///
    /// Panics if the id is invalid or no longer interned.
    pub fn resolve(&self, id: PipelineStateId, local: &LocalPipelineSet) -> PipelineState {
        assert!(id.is_valid(), "cannot resolve an invalid pipeline state id");

        if id.is_local() {
            local.get(id)
        } else {
            self.get(id).expect("pipeline state id was released")
        }
    }

    /// Returns the current reference count of `id`, for diagnostics.
    pub fn ref_count(&self, id: PipelineStateId) -> u32 {
        let table = self.table.read();

        table
            .slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|entry| entry.ref_count.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.table.read().lookup.len()
    }

    /// Returns `true` when no entries are interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A per-frame pipeline-state table: plain hashing, no locks, no refcounts.
///
/// Not shared across threads; each dynamic-draw producer owns its own set.
/// Discarding the set invalidates every id it minted.
#[derive(Default)]
pub struct LocalPipelineSet {
    lookup: HashMap<PipelineState, u32>,
    states: Vec<PipelineState>,
}

impl LocalPipelineSet {
    /// Constructs a new, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the local id for `state`, adding it on first use.
    pub fn get_or_create(&mut self, state: &PipelineState) -> PipelineStateId {
        if let Some(&index) = self.lookup.get(state) {
            return PipelineStateId::local(index);
        }

        let index = self.states.len() as u32;
        self.states.push(*state);
        self.lookup.insert(*state, index);

        PipelineStateId::local(index)
    }

    /// Returns the state behind a local id.
    ///
    /// Panics if the id did not come from this set.
    pub fn get(&self, id: PipelineStateId) -> PipelineState {
        assert!(id.is_valid() && id.is_local());

        self.states[id.index()]
    }

    /// Returns the number of states in the set.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` when the set holds no states.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::driver::{ShaderId, VertexLayoutId},
        std::sync::Arc,
    };

    fn state(shader: u64) -> PipelineState {
        PipelineState::new(ShaderId::new(shader), VertexLayoutId::new(1)).build()
    }

    #[test]
    pub fn interning_is_idempotent() {
        let interner = PipelineStateInterner::new();
        let state = state(1);

        let a = interner.get_or_create(&state);
        let b = interner.get_or_create(&state);

        assert_eq!(a, b);
        assert!(a.is_valid());
        assert!(!a.is_local());
        assert_eq!(interner.ref_count(a), 2);
        assert_eq!(interner.len(), 1);

        interner.release(b);

        assert_eq!(interner.ref_count(a), 1);

        interner.release(a);

        assert!(interner.is_empty());
        assert_eq!(interner.get(a), None);
    }

    #[test]
    pub fn distinct_states_intern_distinct_ids() {
        let interner = PipelineStateInterner::new();

        let a = interner.get_or_create(&state(1));
        let b = interner.get_or_create(&state(2));

        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    pub fn slots_are_recycled() {
        let interner = PipelineStateInterner::new();

        let a = interner.get_or_create(&state(1));
        interner.release(a);

        let b = interner.get_or_create(&state(2));

        // The freed slot is reused for the new state
        assert_eq!(a.index(), b.index());
        assert_eq!(interner.get(b), Some(state(2)));
    }

    #[test]
    #[should_panic(expected = "more than once")]
    pub fn double_release_is_detected() {
        crate::validate::set_enabled(true);

        let interner = PipelineStateInterner::new();
        let id = interner.get_or_create(&state(1));

        interner.release(id);
        interner.release(id);
    }

    #[test]
    pub fn concurrent_interning_resolves_one_id() {
        let interner = Arc::new(PipelineStateInterner::new());
        let state = state(7);

        let ids = (0..8)
            .map(|_| {
                let interner = Arc::clone(&interner);

                std::thread::spawn(move || interner.get_or_create(&state))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(interner.len(), 1);
        assert_eq!(interner.ref_count(ids[0]), 8);
    }

    #[test]
    pub fn local_ids_are_frame_scoped() {
        let interner = PipelineStateInterner::new();
        let mut local = LocalPipelineSet::new();
        let state = state(3);

        let a = local.get_or_create(&state);
        let b = local.get_or_create(&state);

        assert_eq!(a, b);
        assert!(a.is_local());
        assert_eq!(local.len(), 1);
        assert_eq!(interner.resolve(a, &local), state);
    }
}
