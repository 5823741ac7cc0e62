//! Interns component [`TypeId`]s into small dense integers.
//!
//! [`Composition`](crate::composition::Composition) projects a component type to its
//! column within a composition through a `component_index` table whose length is the
//! class-index capacity; the table entry at a type's class index is `0` if the type is
//! absent from that composition, or `1 + ordinal` if present. That scheme only works if
//! every component type used anywhere in the pool is first assigned a stable, densely
//! packed integer, which is what this module provides.

use std::any::TypeId;
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

/// Default capacity hint for the class-index table, per the spec's consumed
/// [`ClassIndex`] interface (§6): component-index arrays are pre-sized to this unless a
/// pool is constructed with a different hint.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Interns [`TypeId`]s into dense `u32` indices.
///
/// Indices are assigned on first sight, in encounter order, and never reassigned or
/// reclaimed: a type that has been interned keeps its index for the lifetime of the
/// `ClassIndex`. This is the reference implementation the spec's §6 "ClassIndex
/// (consumed)" interface describes; a host embedding this crate may supply an
/// alternative implementation that satisfies the same two operations instead.
pub struct ClassIndex {
    capacity_hint: usize,
    map: RwLock<IndexMap<TypeId, u32>>,
    next: AtomicU32,
}

impl ClassIndex {
    /// Creates an empty class index, pre-reserving `capacity_hint` slots.
    pub fn new(capacity_hint: usize) -> Self {
        ClassIndex {
            capacity_hint,
            map: RwLock::new(IndexMap::with_capacity(capacity_hint)),
            next: AtomicU32::new(0),
        }
    }

    /// Looks up the dense index already assigned to `ty`, if any.
    pub fn get_index(&self, ty: TypeId) -> Option<u32> { self.map.read().get(&ty).copied() }

    /// Looks up the dense index for `ty`, assigning the next free index if this is the
    /// first time `ty` has been seen.
    pub fn get_or_create(&self, ty: TypeId) -> u32 {
        if let Some(index) = self.get_index(ty) {
            return index;
        }

        let mut map = self.map.write();
        // Re-check: another thread may have interned `ty` while we waited for the lock.
        if let Some(&index) = map.get(&ty) {
            return index;
        }

        let index = self.next.fetch_add(1, Ordering::SeqCst);
        if index as usize >= self.capacity_hint {
            log::warn!(
                "class index table grew past its capacity hint of {} entries",
                self.capacity_hint
            );
        }
        map.insert(ty, index);
        index
    }

    /// Number of distinct types interned so far.
    pub fn len(&self) -> usize { self.map.read().len() }

    /// Whether no type has been interned yet.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Default for ClassIndex {
    fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo;
    struct Bar;

    #[test]
    fn assigns_stable_dense_indices() {
        let index = ClassIndex::default();
        let foo = index.get_or_create(TypeId::of::<Foo>());
        let bar = index.get_or_create(TypeId::of::<Bar>());
        assert_ne!(foo, bar);
        assert_eq!(index.get_or_create(TypeId::of::<Foo>()), foo);
        assert_eq!(index.get_index(TypeId::of::<Bar>()), Some(bar));
    }

    #[test]
    fn unknown_type_has_no_index_until_created() {
        let index = ClassIndex::default();
        assert_eq!(index.get_index(TypeId::of::<Foo>()), None);
        assert_eq!(index.len(), 0);
        index.get_or_create(TypeId::of::<Foo>());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn warns_past_capacity_hint_but_keeps_working() {
        let index = ClassIndex::new(1);
        let a = index.get_or_create(TypeId::of::<Foo>());
        let b = index.get_or_create(TypeId::of::<Bar>());
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }
}
