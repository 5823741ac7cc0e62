//! Packs and unpacks entity handles into a single 32-bit integer.
//!
//! A handle is laid out as `|DETACHED(1)|CHUNK_ID(31-b)|OBJECT_ID(b)|`, where `b` is the
//! chunk-bit parameter chosen when the owning pool is constructed. Packing and
//! unpacking are pure bit operations; this type allocates nothing and holds no
//! interior mutability.

use static_assertions::const_assert_eq;

/// The raw packed entity handle. Bit 31 is the detached flag; the remaining 31 bits
/// split into a chunk id (high) and an object id (low) at the boundary chosen by
/// [`IdSchema::chunk_bit`].
pub type RawId = u32;

const_assert_eq!(std::mem::size_of::<RawId>(), 4);

/// Marks a [`RawId`] as no longer referring to a live slot.
///
/// This bit is never set on a live id, so it doubles as the sentinel value returned by
/// [`crate::stack::IdStack::pop`] to signal an empty stack.
pub const DETACHED_BIT: RawId = 1 << 31;

/// Smallest and largest permitted chunk-bit values.
///
/// Below 8 a chunk would hold too few entities to amortize chunk-creation overhead;
/// above 16 the object id would no longer fit the lower half of a `u16`-sized index,
/// which the column storage relies on for compact capacity bookkeeping.
pub const MIN_CHUNK_BIT: u8 = 8;
pub const MAX_CHUNK_BIT: u8 = 16;

/// Derives the bit layout of packed ids for a given chunk-bit parameter and packs or
/// unpacks ids against that layout.
///
/// Two schemas are only interchangeable if they were constructed with the same
/// `chunk_bit`; mixing ids produced under different schemas is a logic error that this
/// type has no way to detect (it is a bare value type, not tied to a particular pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSchema {
    chunk_bit: u8,
    object_mask: RawId,
    chunk_mask: RawId,
    chunk_count: u32,
}

impl IdSchema {
    /// Constructs a schema from the chunk-bit parameter.
    ///
    /// # Panics
    /// Panics if `chunk_bit` is outside `[MIN_CHUNK_BIT, MAX_CHUNK_BIT]`.
    pub fn new(chunk_bit: u8) -> Self {
        assert!(
            (MIN_CHUNK_BIT..=MAX_CHUNK_BIT).contains(&chunk_bit),
            "chunk_bit must be in [{MIN_CHUNK_BIT}, {MAX_CHUNK_BIT}], got {chunk_bit}"
        );

        let object_mask: RawId = (1u32 << chunk_bit) - 1;
        // 31 non-flag bits total; chunk id occupies the remaining high bits.
        let chunk_bits = 31 - u32::from(chunk_bit);
        let chunk_mask = (1u32 << chunk_bits) - 1;
        let chunk_count = 1u32 << chunk_bits;

        IdSchema { chunk_bit, object_mask, chunk_mask, chunk_count }
    }

    /// The chunk-bit parameter this schema was constructed with.
    pub fn chunk_bit(&self) -> u8 { self.chunk_bit }

    /// Number of distinct chunk ids addressable under this schema (`2^(31-b)`).
    pub fn chunk_count(&self) -> u32 { self.chunk_count }

    /// Number of object slots per chunk under this schema (`2^b`).
    pub fn chunk_capacity(&self) -> u32 { self.object_mask + 1 }

    /// Packs a chunk id and object id into a single handle.
    ///
    /// # Panics
    /// Panics if `chunk_id` or `object_id` does not fit in its allotted bits.
    pub fn pack(&self, chunk_id: u32, object_id: u32) -> RawId {
        assert!(chunk_id <= self.chunk_mask, "chunk_id {chunk_id} exceeds chunk_count");
        assert!(object_id <= self.object_mask, "object_id {object_id} exceeds chunk_capacity");
        (chunk_id << self.chunk_bit) | object_id
    }

    /// Extracts the chunk id from a handle, ignoring the detached flag.
    pub fn chunk_of(&self, id: RawId) -> u32 { (id & !DETACHED_BIT) >> self.chunk_bit }

    /// Extracts the object id (slot index within its chunk) from a handle.
    pub fn object_of(&self, id: RawId) -> u32 { id & self.object_mask }

    /// Whether the handle's detached flag is set.
    pub fn is_detached(id: RawId) -> bool { id & DETACHED_BIT != 0 }

    /// Returns the handle with the detached flag set, preserving chunk/object bits so
    /// the original location remains visible for debugging.
    pub fn set_detached(id: RawId) -> RawId { id | DETACHED_BIT }
}
