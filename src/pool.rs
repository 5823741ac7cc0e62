//! The global, cross-tenant chunk array.

use std::sync::Arc;

use parking_lot::RwLock;
use xias::Xias;

use crate::chunk::{ChunkId, LinkedChunk};
use crate::class_index::ClassIndex;
use crate::error::EallocError;
use crate::id::IdSchema;

/// Owns every chunk ever created across every tenant (composition) sharing one
/// [`IdSchema`], indexed densely by `chunk_id`.
///
/// The spec describes `chunks[chunkCount]` as "sparsely populated as tenants grow":
/// chunk ids are handed out from one global monotonically increasing counter, so any
/// one tenant's chunks are scattered (not contiguous) among another tenant's, even
/// though the backing array itself is filled front-to-back with no gaps. Pre-allocating
/// the full `chunkCount` (up to 2^23 entries at the minimum chunk_bit) up front would be
/// wasteful, so this stores a plain growable `Vec` instead and assigns each new chunk
/// the next index as it is created.
pub struct ChunkedPool {
    schema: IdSchema,
    class_index: Arc<ClassIndex>,
    chunks: RwLock<Vec<Arc<LinkedChunk>>>,
    /// Lets tests exhaust the chunk id space without actually allocating
    /// `schema.chunk_count()` real chunks (at `MIN_CHUNK_BIT` that's 2^23 multi-megabyte
    /// slabs). Production pools never set this, so `create_chunk` always falls back to
    /// the schema's real `chunk_count`.
    #[cfg(test)]
    chunk_limit: std::sync::atomic::AtomicU32,
}

impl ChunkedPool {
    pub fn new(schema: IdSchema, class_index: Arc<ClassIndex>) -> Self {
        ChunkedPool {
            schema,
            class_index,
            chunks: RwLock::new(Vec::new()),
            #[cfg(test)]
            chunk_limit: std::sync::atomic::AtomicU32::new(u32::MAX),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_chunk_limit_for_tests(&self, limit: u32) {
        self.chunk_limit.store(limit, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn chunk_limit(&self) -> u32 {
        self.chunk_limit.load(std::sync::atomic::Ordering::SeqCst).min(self.schema.chunk_count())
    }

    #[cfg(not(test))]
    fn chunk_limit(&self) -> u32 { self.schema.chunk_count() }

    pub(crate) fn schema(&self) -> IdSchema { self.schema }

    pub(crate) fn class_index(&self) -> &Arc<ClassIndex> { &self.class_index }

    /// Creates a new chunk with `data_len` component columns, appends it to the global
    /// chunk array, and returns its freshly assigned id.
    ///
    /// # Errors
    /// Returns [`EallocError`] if every chunk id under this pool's schema has already
    /// been created (§7 "Out-of-capacity"); the 2^31-entity ceiling.
    pub(crate) fn create_chunk(
        &self,
        data_len: usize,
        previous: Option<ChunkId>,
    ) -> Result<ChunkId, EallocError> {
        let mut chunks = self.chunks.write();
        let id: ChunkId = chunks.len().small_int();
        if id >= self.chunk_limit() {
            return Err(EallocError {
                chunk_bit: self.schema.chunk_bit(),
                chunk_count: self.schema.chunk_count(),
            });
        }
        chunks.push(Arc::new(LinkedChunk::new(id, self.schema.chunk_capacity(), data_len, previous)));
        log::trace!("pool created chunk {id} (data_len={data_len}, previous={previous:?})");
        Ok(id)
    }

    /// Looks up a chunk by id. `None` only if `id` was never created by this pool.
    pub(crate) fn chunk(&self, id: ChunkId) -> Option<Arc<LinkedChunk>> {
        self.chunks.read().get(id.small_int::<usize>()).cloned()
    }

    /// Total number of chunks ever created.
    pub(crate) fn chunk_count(&self) -> usize { self.chunks.read().len() }

    /// Iterates every chunk in reverse creation order (most recently created first), the
    /// traversal direction the spec's backward pool scan uses so that entities created
    /// during the scan (always appended to the newest chunk) are never double-visited.
    pub(crate) fn chunks_reverse(&self) -> Vec<Arc<LinkedChunk>> {
        let mut chunks: Vec<_> = self.chunks.read().clone();
        chunks.reverse();
        chunks
    }

    /// `allEntities()` (§4.5): every currently-live entity across every tenant this pool
    /// owns, in reverse-chunk-creation order. Unlike [`crate::composition::Composition`]'s
    /// own scans, this does not check composition identity against any particular
    /// composition — a slot's back-reference is trusted as-is, which is correct here
    /// since this walks literally every chunk, not one composition's chunk list.
    pub fn all_entities(&self) -> impl Iterator<Item = crate::entity::Entity> + '_ {
        self.chunks_reverse().into_iter().flat_map(|chunk| {
            let hwm = chunk.high_water_mark();
            (0..hwm).rev().filter_map(move |object_id| chunk.load(object_id))
        })
    }
}
