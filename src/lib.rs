//! A chunked, multi-tenant storage and identity core for an entity-component-system.
//!
//! - Entities are packed 32-bit handles (`chunkId`, `objectId`, a detached flag); see
//!   [`id::IdSchema`].
//! - Entities of identical component shape ("composition") are grouped into one
//!   tenant's chunk list, struct-of-arrays style, for cache-friendly scans; see
//!   [`composition::Composition`] and [`chunk::LinkedChunk`].
//! - Entities may additionally participate in at most one enumerated-state chain per
//!   composition at a time, for O(1) "all entities currently in state S" enumeration.
//! - [`registry::Registry`] is the one process-wide handle: it owns the shared pool and
//!   class index and interns one composition per distinct shape. Everything above it —
//!   factory lookup, typed query-builder sugar, a scheduler driving systems across
//!   frames — is deliberately out of scope; see `DESIGN.md`.

#![cfg_attr(
    debug_assertions,
    allow(dead_code, unused_imports, unused_variables, clippy::match_single_binding)
)]
#![cfg_attr(any(doc, not(debug_assertions)), deny(missing_docs))]
#![cfg_attr(
    not(debug_assertions),
    deny(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::dbg_macro)
)]

pub mod chunk;
pub mod class_index;
pub mod composition;
pub mod entity;
pub mod error;
pub mod id;
pub mod pool;
pub mod registry;
mod stack;
mod tenant;

#[doc(inline)]
pub use class_index::ClassIndex;
#[doc(inline)]
pub use composition::Composition;
#[doc(inline)]
pub use entity::Entity;
#[doc(inline)]
pub use error::EallocError;
#[doc(inline)]
pub use id::IdSchema;
#[doc(inline)]
pub use pool::ChunkedPool;
#[doc(inline)]
pub use registry::Registry;

mod test_util;
