//! The entity handle and its backing slot record.
//!
//! An [`Entity`] is a cheap, clonable reference to a per-entity bookkeeping record (the
//! "slot"). The hot per-entity data — component values — never lives on the slot; it
//! lives in the owning chunk's columns (see [`crate::chunk`]), which is what makes
//! iteration cache-friendly. The slot only tracks the bookkeeping the spec calls `data`
//! (§4.6): the entity's current packed id, which composition it belongs to, and which
//! state chain (if any) it participates in.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::composition::Composition;
use crate::id::RawId;

/// A compact hashable key identifying an enumerated state value, derived from
/// `(class_index, ordinal)` per the spec's glossary. Two [`IndexKey`]s compare equal
/// iff they were derived from the same enum type and the same ordinal within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub(crate) class_index: u32,
    pub(crate) ordinal: u32,
}

impl IndexKey {
    pub(crate) fn new(class_index: u32, ordinal: u32) -> Self { IndexKey { class_index, ordinal } }
}

/// The atomically-swapped record behind an [`Entity`].
///
/// The spec describes this as a three-field `(composition, components[], stateRoot?)`
/// tuple published as a single reference so migration never exposes a torn view. This
/// crate stores chunk-backed component values in the chunk itself rather than
/// duplicating them per entity (see `DESIGN.md`), so the record that must move
/// atomically together is instead `(id, composition, state_root)`: the packed id is
/// what locates the entity's row in its (possibly just-migrated-to) chunk, so it has to
/// change in lockstep with `composition`, not independently of it.
pub(crate) struct SlotData {
    pub(crate) id: RawId,
    pub(crate) composition: Arc<Composition>,
    pub(crate) state_root: Option<IndexKey>,
}

/// The two intrusive pointers linking an entity into its composition's state chain.
///
/// Mutated only while the owning composition's writer-exclusive chain lock is held
/// (see [`crate::composition::state`]); read without that lock during chain traversal,
/// which is safe because the mutations themselves are individually lock-protected at
/// the entity level and traversal tolerates a momentarily stale view (the spec's
/// ordering guarantee 3 in §5).
#[derive(Default)]
pub(crate) struct ChainLinks {
    pub(crate) prev: Option<Entity>,
    pub(crate) next: Option<Entity>,
}

struct Slot {
    data: Mutex<Arc<SlotData>>,
    links: Mutex<ChainLinks>,
}

/// A reference-counted handle to a live (or momentarily just-freed) entity.
///
/// Cloning an `Entity` is cheap (an `Arc` clone) and all clones observe the same
/// underlying slot, so holding an `Entity` is how callers keep a stable reference
/// across migrations that change the entity's packed id.
#[derive(Clone)]
pub struct Entity(Arc<Slot>);

impl Entity {
    pub(crate) fn new(id: RawId, composition: Arc<Composition>) -> Self {
        Entity(Arc::new(Slot {
            data: Mutex::new(Arc::new(SlotData { id, composition, state_root: None })),
            links: Mutex::new(ChainLinks::default()),
        }))
    }

    /// The entity's current packed handle.
    ///
    /// This is a snapshot: a concurrent migration on another thread may change it the
    /// instant after this call returns. Callers that need to act on a consistent
    /// `(id, composition)` pair should use [`Entity::snapshot`] instead.
    pub fn id(&self) -> RawId { self.0.data.lock().id }

    /// The composition this entity currently belongs to.
    pub fn composition(&self) -> Arc<Composition> { Arc::clone(&self.0.data.lock().composition) }

    /// Atomically reads `(id, composition, state_root)` together.
    pub(crate) fn snapshot(&self) -> Arc<SlotData> { Arc::clone(&self.0.data.lock()) }

    /// Atomically publishes a new `(id, composition, state_root)` record.
    ///
    /// This is the single-publication point migration relies on: readers calling
    /// [`Entity::snapshot`] either see the pre-migration record in full or the
    /// post-migration record in full, never a mix.
    pub(crate) fn publish(&self, data: SlotData) { *self.0.data.lock() = Arc::new(data); }

    pub(crate) fn state_root(&self) -> Option<IndexKey> { self.0.data.lock().state_root }

    pub(crate) fn set_state_root(&self, state_root: Option<IndexKey>) {
        let mut guard = self.0.data.lock();
        let current = &*guard;
        let updated =
            SlotData { id: current.id, composition: Arc::clone(&current.composition), state_root };
        *guard = Arc::new(updated);
    }

    pub(crate) fn links(&self) -> parking_lot::MutexGuard<'_, ChainLinks> { self.0.links.lock() }

    /// Whether two `Entity` handles refer to the same underlying slot.
    pub fn ptr_eq(&self, other: &Entity) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity").field("id", &self.id()).finish()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool { self.ptr_eq(other) }
}
impl Eq for Entity {}
