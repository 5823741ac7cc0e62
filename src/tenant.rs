//! Owns the chunk list and id-recycler for a single composition.

use parking_lot::Mutex;
use xias::Xias;

use crate::chunk::ChunkId;
use crate::error::EallocError;
use crate::id::{IdSchema, RawId};
use crate::pool::ChunkedPool;
use crate::stack::IdStack;

/// Identifies a tenant within a [`ChunkedPool`].
pub type TenantId = u32;

struct AllocState {
    current_chunk: ChunkId,
    /// The packed handle that the *next* fresh allocation will hand out.
    next_id: RawId,
}

/// The private chunk-list and id-recycler for one composition within a shared pool.
///
/// Allocation follows the spec's two-tier protocol (§4.4): a lock-free pop from the
/// recycled-id stack on the common path, falling back to a tenant-local critical
/// section that advances the current chunk's cursor (or creates a new chunk) only when
/// nothing is recyclable.
pub(crate) struct Tenant {
    id: TenantId,
    schema: IdSchema,
    data_len: usize,
    first_chunk: ChunkId,
    alloc: Mutex<AllocState>,
    id_stack: Mutex<IdStack>,
    /// Debug label used in log messages, e.g. a joined list of component type names.
    subject: String,
}

impl Tenant {
    /// Creates a tenant and eagerly allocates its first chunk, reserving object id 0
    /// in it as the pending `next_id` so the very first call to
    /// [`Tenant::allocate_id`] can return `pack(first_chunk, 0)` without a torn
    /// bootstrap step.
    pub(crate) fn new(
        id: TenantId,
        schema: IdSchema,
        data_len: usize,
        pool: &ChunkedPool,
        subject: String,
    ) -> Result<Self, EallocError> {
        let first_chunk = pool.create_chunk(data_len, None)?;
        let chunk = pool.chunk(first_chunk).expect("just created");
        let reserved =
            chunk.acquire_slot().expect("a freshly created chunk always has room for slot 0");
        debug_assert_eq!(reserved, 0);

        log::debug!("tenant {id} ({subject}) created, first chunk={first_chunk}");

        Ok(Tenant {
            id,
            schema,
            data_len,
            first_chunk,
            alloc: Mutex::new(AllocState {
                current_chunk: first_chunk,
                next_id: schema.pack(first_chunk, 0),
            }),
            id_stack: Mutex::new(IdStack::with_capacity(8 * schema.chunk_capacity().small_int::<usize>())),
            subject,
        })
    }

    pub(crate) fn id(&self) -> TenantId { self.id }

    pub(crate) fn data_len(&self) -> usize { self.data_len }

    pub(crate) fn first_chunk(&self) -> ChunkId { self.first_chunk }

    pub(crate) fn current_chunk(&self) -> ChunkId { self.alloc.lock().current_chunk }

    /// Allocates a fresh or recycled packed id.
    ///
    /// # Errors
    /// Returns [`EallocError`] if a new chunk is needed and the pool's schema has no
    /// room left for one (§7 "Out-of-capacity").
    pub(crate) fn allocate_id(&self, pool: &ChunkedPool) -> Result<RawId, EallocError> {
        // Fast path: a non-empty pop bypasses the critical section entirely.
        let popped = self.id_stack.lock().pop();
        if !IdSchema::is_detached(popped) {
            let chunk = pool.chunk(self.schema.chunk_of(popped)).expect("recycled id's chunk exists");
            chunk.decrement_rm();
            log::trace!("tenant {} recycled id {:#x}", self.id, popped);
            return Ok(popped);
        }

        let mut alloc = self.alloc.lock();
        let to_return = alloc.next_id;

        let current = pool.chunk(alloc.current_chunk).expect("current chunk always exists");
        if current.has_capacity() {
            let slot = current.acquire_slot().expect("has_capacity just confirmed room");
            alloc.next_id = self.schema.pack(alloc.current_chunk, slot);
        } else {
            let new_chunk_id = pool.create_chunk(self.data_len, Some(alloc.current_chunk))?;
            current.link_next(new_chunk_id);
            let new_chunk = pool.chunk(new_chunk_id).expect("just created");
            let slot = new_chunk.acquire_slot().expect("a fresh chunk always has room for slot 0");
            log::debug!("tenant {} ({}) rolled over to chunk {new_chunk_id}", self.id, self.subject);
            alloc.current_chunk = new_chunk_id;
            alloc.next_id = self.schema.pack(new_chunk_id, slot);
        }

        log::trace!("tenant {} allocated id {:#x}", self.id, to_return);
        Ok(to_return)
    }

    /// Marks `id` detached and returns it to the recycler. Does not touch the entity's
    /// own record; callers (the composition layer) are responsible for clearing that
    /// separately, since this layer has no notion of entities, only raw ids and chunks.
    pub(crate) fn free_id(&self, id: RawId, pool: &ChunkedPool) {
        let chunk = pool.chunk(self.schema.chunk_of(id)).expect("freed id's chunk exists");
        chunk.free(self.schema.object_of(id));
        self.id_stack.lock().push(id);
        log::trace!("tenant {} freed id {:#x}", self.id, id);
    }

    pub(crate) fn schema(&self) -> IdSchema { self.schema }
}
