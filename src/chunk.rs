//! Fixed-capacity slabs of entity slots plus their component columns.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use xias::Xias;

use crate::entity::Entity;

/// Identifies a chunk within a [`crate::pool::ChunkedPool`].
pub type ChunkId = u32;

/// A boxed, type-erased component value.
pub type AnyComponent = Box<dyn Any + Send + Sync>;

struct Body {
    items: Vec<Option<Entity>>,
    /// Struct-of-arrays component storage: `columns[column][object_id]`.
    ///
    /// The spec distinguishes a single-column storage mode from a multi-column mode as
    /// a micro-optimization specific to the source's object-array representation; a
    /// `Vec` of one column already has no such overhead in Rust; see `DESIGN.md`.
    columns: Vec<Vec<Option<AnyComponent>>>,
}

/// A fixed-capacity slab owning one `items` array (entity back-references keyed by
/// object id) plus the composition's component columns, linked into its tenant's chunk
/// list via `previous`/`next`.
pub struct LinkedChunk {
    id: ChunkId,
    capacity: u32,
    /// Next free object id; bumped with `fetch_add` so concurrent creators never
    /// collide on a slot.
    index: AtomicU32,
    /// Count of object ids that have been freed (and not yet re-acquired) in this
    /// chunk, used to compute `size()` without scanning `items`.
    rm: AtomicU32,
    body: Mutex<Body>,
    /// Fixed at construction: the chunk immediately before this one in its tenant's
    /// list, or `None` if this is the tenant's first chunk.
    previous: Option<ChunkId>,
    /// Set once, when the next chunk is created; `None` while this is the tenant's
    /// current (last) chunk.
    next: Mutex<Option<ChunkId>>,
}

impl LinkedChunk {
    pub(crate) fn new(id: ChunkId, capacity: u32, data_len: usize, previous: Option<ChunkId>) -> Self {
        assert!(data_len >= 1, "a composition must own at least one component column");
        let mut items = Vec::with_capacity(capacity.small_int());
        items.resize_with(capacity.small_int(), || None);
        let columns = (0..data_len)
            .map(|_| {
                let mut col = Vec::with_capacity(capacity.small_int());
                col.resize_with(capacity.small_int(), || None);
                col
            })
            .collect();

        LinkedChunk {
            id,
            capacity,
            index: AtomicU32::new(0),
            rm: AtomicU32::new(0),
            body: Mutex::new(Body { items, columns }),
            previous,
            next: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ChunkId { self.id }

    pub(crate) fn previous(&self) -> Option<ChunkId> { self.previous }

    pub(crate) fn next(&self) -> Option<ChunkId> { *self.next.lock() }

    pub(crate) fn link_next(&self, next_id: ChunkId) {
        let mut next = self.next.lock();
        assert!(next.is_none(), "chunk {} already has a next chunk", self.id);
        *next = Some(next_id);
    }

    /// Atomically reserves the next free object id.
    ///
    /// Returns `None` if doing so would leave no room for the sentinel slot the
    /// tenant's allocation protocol always keeps free (`hasCapacity` checks
    /// `index < capacity - 1`); callers are expected to have checked
    /// [`LinkedChunk::has_capacity`] first, so this should not normally happen, but the
    /// rollback keeps the counter honest if it does.
    pub(crate) fn acquire_slot(&self) -> Option<u32> {
        let previous = self.index.fetch_add(1, Ordering::SeqCst);
        if previous + 1 < self.capacity {
            Some(previous)
        } else {
            self.index.fetch_sub(1, Ordering::SeqCst);
            None
        }
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.index.load(Ordering::SeqCst) < self.capacity.saturating_sub(1)
    }

    /// Writes the entity back-reference and initial component values for `object_id`.
    ///
    /// `components` must have exactly as many entries as this chunk has columns, in
    /// column order.
    pub(crate) fn store(&self, object_id: u32, entity: Entity, components: Vec<AnyComponent>) {
        let mut body = self.body.lock();
        assert_eq!(
            components.len(),
            body.columns.len(),
            "store() called with the wrong number of component values"
        );
        let idx: usize = object_id.small_int();
        body.items[idx] = Some(entity);
        for (column, value) in body.columns.iter_mut().zip(components) {
            column[idx] = Some(value);
        }
    }

    pub(crate) fn load(&self, object_id: u32) -> Option<Entity> {
        self.body.lock().items[object_id.small_int::<usize>()].clone()
    }

    /// Binds the entity back-reference at `object_id` without touching any column.
    /// Used by migration, which writes columns itself via [`LinkedChunk::copy_from`] and
    /// [`LinkedChunk::add`] and only needs `items[]` updated afterward.
    pub(crate) fn bind(&self, object_id: u32, entity: Entity) {
        self.body.lock().items[object_id.small_int::<usize>()] = Some(entity);
    }

    /// Clears the entity back-reference at `object_id` and marks one more slot
    /// removed. Does not touch the tenant's id stack; callers push the freed id
    /// themselves (see [`crate::tenant::Tenant::free_id`]).
    pub(crate) fn free(&self, object_id: u32) {
        let mut body = self.body.lock();
        body.items[object_id.small_int::<usize>()] = None;
        self.rm.fetch_add(1, Ordering::SeqCst);
    }

    /// Balances `rm` when a previously freed id in this chunk is popped and reused.
    pub(crate) fn decrement_rm(&self) { self.rm.fetch_sub(1, Ordering::SeqCst); }

    /// Copies surviving columns from `src` at `src_object_id` into `self` at
    /// `object_id`, per `index_mapping`: `index_mapping[i]` is the destination column
    /// for source column `i`, or `None` if that column is dropped during migration.
    /// Values are moved out of `src`, not cloned, since the source slot is being freed.
    ///
    /// Locks both chunks' bodies in ascending `ChunkId` order rather than by src/dest
    /// role: two entities migrating in opposite directions between the same pair of
    /// compositions (A→B and B→A) would otherwise lock `(dest, src)` in opposite orders
    /// and could deadlock, which §5's "no user-visible suspension points" model forbids.
    pub(crate) fn copy_from(
        &self,
        object_id: u32,
        src: &LinkedChunk,
        src_object_id: u32,
        index_mapping: &[Option<usize>],
    ) {
        let src_idx: usize = src_object_id.small_int();
        let dst_idx: usize = object_id.small_int();

        if self.id == src.id {
            let mut body = self.body.lock();
            assert_eq!(
                index_mapping.len(),
                body.columns.len(),
                "index_mapping must cover every source column"
            );
            for (src_col, &dest) in index_mapping.iter().enumerate() {
                let Some(dest_col) = dest else { continue };
                let value = body.columns[src_col][src_idx].take();
                body.columns[dest_col][dst_idx] = value;
            }
            return;
        }

        let (mut dst_body, mut src_body) = if self.id < src.id {
            let dst = self.body.lock();
            let src = src.body.lock();
            (dst, src)
        } else {
            let src = src.body.lock();
            let dst = self.body.lock();
            (dst, src)
        };

        assert_eq!(
            index_mapping.len(),
            src_body.columns.len(),
            "index_mapping must cover every source column"
        );

        for (src_col, &dest) in index_mapping.iter().enumerate() {
            let Some(dest_col) = dest else { continue };
            let value = src_body.columns[src_col][src_idx].take();
            dst_body.columns[dest_col][dst_idx] = value;
        }
    }

    /// Writes newly attached component values into `self` at `object_id`.
    /// `added` pairs each new value with its destination column index.
    pub(crate) fn add(&self, object_id: u32, added: Vec<(usize, AnyComponent)>) {
        let mut body = self.body.lock();
        let idx: usize = object_id.small_int();
        for (column, value) in added {
            body.columns[column][idx] = Some(value);
        }
    }

    /// Reads a single column value for `object_id` via the supplied downcast. Used by
    /// typed iteration; panics if the caller's type does not match what was stored,
    /// which would indicate a composition/column-index mismatch in the caller.
    pub(crate) fn with_component<T: 'static, R>(
        &self,
        column: usize,
        object_id: u32,
        f: impl FnOnce(Option<&T>) -> R,
    ) -> R {
        let body = self.body.lock();
        let cell = &body.columns[column][object_id.small_int::<usize>()];
        f(cell.as_ref().map(|boxed| {
            boxed.downcast_ref::<T>().expect("column type mismatch: composition corrupted")
        }))
    }

    /// `index + (hasNext?1:0) - rm`, per the spec's chunk size invariant.
    pub(crate) fn size(&self) -> u32 {
        let has_next = u32::from(self.next().is_some());
        self.index.load(Ordering::SeqCst) + has_next - self.rm.load(Ordering::SeqCst)
    }

    /// Highest object id ever acquired in this chunk (exclusive upper bound for a
    /// backward scan); slots at or above this are never populated.
    pub(crate) fn high_water_mark(&self) -> u32 { self.index.load(Ordering::SeqCst) }

    pub(crate) fn capacity(&self) -> u32 { self.capacity }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::dummy_composition;

    fn entity() -> Entity { Entity::new(0, dummy_composition(1)) }

    #[test]
    fn acquire_slot_stops_one_before_capacity() {
        let chunk = LinkedChunk::new(0, 4, 1, None);
        assert_eq!(chunk.acquire_slot(), Some(0));
        assert_eq!(chunk.acquire_slot(), Some(1));
        assert_eq!(chunk.acquire_slot(), Some(2));
        // capacity is 4, so index 3 would leave no sentinel slot free.
        assert_eq!(chunk.acquire_slot(), None);
        assert!(!chunk.has_capacity());
    }

    #[test]
    fn store_then_load_round_trips_entity_and_columns() {
        let chunk = LinkedChunk::new(0, 4, 2, None);
        let slot = chunk.acquire_slot().expect("room for one entity");
        let e = entity();
        chunk.store(slot, e.clone(), vec![Box::new(1u32), Box::new("a")]);
        assert_eq!(chunk.load(slot).unwrap().id(), e.id());
        chunk.with_component::<u32, _>(0, slot, |v| assert_eq!(v, Some(&1)));
        chunk.with_component::<&str, _>(1, slot, |v| assert_eq!(v, Some(&"a")));
    }

    #[test]
    fn free_clears_slot_and_increments_rm() {
        let chunk = LinkedChunk::new(0, 4, 1, None);
        let slot = chunk.acquire_slot().unwrap();
        chunk.store(slot, entity(), vec![Box::new(1u32)]);
        assert_eq!(chunk.size(), 1);
        chunk.free(slot);
        assert!(chunk.load(slot).is_none());
        assert_eq!(chunk.size(), 0);
    }

    #[test]
    fn copy_from_moves_surviving_columns_and_drops_others() {
        // source has [Foo, Bar], destination only keeps Foo (mapped to column 0),
        // Bar is dropped (None).
        let src = LinkedChunk::new(0, 4, 2, None);
        let dst = LinkedChunk::new(1, 4, 1, None);
        let s = src.acquire_slot().unwrap();
        let d = dst.acquire_slot().unwrap();
        src.store(s, entity(), vec![Box::new(42u32), Box::new(7i64)]);

        dst.copy_from(d, &src, s, &[Some(0), None]);
        dst.with_component::<u32, _>(0, d, |v| assert_eq!(v, Some(&42)));
    }

    #[test]
    fn add_writes_new_columns_at_destination() {
        let dst = LinkedChunk::new(0, 4, 2, None);
        let d = dst.acquire_slot().unwrap();
        dst.store(d, entity(), vec![Box::new(1u32), Box::new(0i64)]);
        dst.add(d, vec![(1, Box::new(99i64))]);
        dst.with_component::<i64, _>(1, d, |v| assert_eq!(v, Some(&99)));
    }

    #[test]
    fn size_accounts_for_has_next() {
        let chunk = LinkedChunk::new(0, 4, 1, None);
        assert_eq!(chunk.size(), 0);
        chunk.link_next(1);
        assert_eq!(chunk.size(), 1);
    }
}
