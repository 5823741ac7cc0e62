//! The process-wide "world handle": owns the shared pool and interns one
//! [`Composition`] per distinct component shape (§9 "Global state").
//!
//! Everything else in this crate is scoped to a pool or to one composition; only a
//! composition-id sequence and the shared [`ClassIndex`] are genuinely process-wide, so
//! both live on an explicit handle here rather than as free-floating statics — the same
//! preference for an explicit owning type over ambient globals the teacher crate shows
//! in its own interning map, `syncmap::SyncMap`.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::chunk::AnyComponent;
use crate::class_index::ClassIndex;
use crate::composition::state::EnumState;
use crate::composition::{Composition, CompositionId};
use crate::entity::Entity;
use crate::error::EallocError;
use crate::id::IdSchema;
use crate::pool::ChunkedPool;

/// Owns the shared [`ChunkedPool`]/[`ClassIndex`] pair and interns one [`Composition`]
/// per distinct component shape ever requested through it.
///
/// Not the "façade" §6 excludes (no factory lookup, no typed query-builder sugar) —
/// just the minimal shared state a façade built on top of this crate would need: where
/// to find the pool, and how to turn a set of component types into the `Composition`
/// that owns them.
pub struct Registry {
    pool: Arc<ChunkedPool>,
    next_composition_id: AtomicU32,
    /// Interned by the *sorted* set of class indices making up the shape, not by
    /// `TypeId` itself: `TypeId` is not guaranteed `Ord` on stable Rust, while a
    /// `Vec<u32>` of already-assigned class indices is a trivial, stable map key and
    /// also fixes the composition's canonical column order in one step.
    compositions: RwLock<BTreeMap<Vec<u32>, Arc<Composition>>>,
}

impl Registry {
    /// A registry with the default class-index capacity hint (§11, `1024`).
    pub fn new(chunk_bit: u8) -> Self {
        Registry::with_class_index_capacity(chunk_bit, crate::class_index::DEFAULT_CAPACITY)
    }

    pub fn with_class_index_capacity(chunk_bit: u8, class_index_capacity: usize) -> Self {
        let class_index = Arc::new(ClassIndex::new(class_index_capacity));
        let pool = Arc::new(ChunkedPool::new(IdSchema::new(chunk_bit), class_index));
        Registry {
            pool,
            next_composition_id: AtomicU32::new(0),
            compositions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn pool(&self) -> &Arc<ChunkedPool> { &self.pool }

    /// Interns (or looks up) the composition for exactly this set of component types, in
    /// whatever order the caller supplies them; canonical order within the composition
    /// is always ascending class index (§3 "canonical order"), independent of the
    /// argument order, so the same shape always resolves to the same composition no
    /// matter how its types were listed.
    ///
    /// # Errors
    /// Returns [`EallocError`] only the first time this exact shape is seen and its
    /// tenant's first chunk cannot be allocated (§7 "Out-of-capacity"); a shape already
    /// interned never fails.
    pub fn composition_for(&self, types: &[TypeId]) -> Result<Arc<Composition>, EallocError> {
        let mut indexed: Vec<(u32, TypeId)> =
            types.iter().map(|ty| (self.pool.class_index().get_or_create(*ty), *ty)).collect();
        indexed.sort_unstable_by_key(|&(class_index, _)| class_index);
        let key: Vec<u32> = indexed.iter().map(|&(class_index, _)| class_index).collect();

        if let Some(existing) = self.compositions.read().get(&key) {
            return Ok(Arc::clone(existing));
        }

        let mut compositions = self.compositions.write();
        // Another thread may have interned this exact shape while we waited for the lock.
        if let Some(existing) = compositions.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let id: CompositionId = self.next_composition_id.fetch_add(1, Ordering::SeqCst);
        let component_types: Vec<TypeId> = indexed.into_iter().map(|(_, ty)| ty).collect();
        let composition =
            Composition::new(id, component_types, Arc::clone(&self.pool), format!("composition#{id}"))?;
        compositions.insert(key, Arc::clone(&composition));
        Ok(composition)
    }

    /// Creates a new entity of exactly the shape implied by `components`' runtime types,
    /// interning that composition first if it has never been seen.
    pub fn create_entity(&self, components: Vec<AnyComponent>) -> Result<Entity, EallocError> {
        let types: Vec<TypeId> = components.iter().map(|value| (**value).type_id()).collect();
        let composition = self.composition_for(&types)?;
        composition.create_entity(components)
    }

    pub fn delete_entity(&self, entity: &Entity) { entity.composition().delete_entity(entity); }

    /// Adds `added` to `entity`'s existing component set, migrating it into whichever
    /// composition already covers the resulting shape (interning that composition first
    /// if this is the first entity ever to need it).
    ///
    /// # Errors
    /// Returns [`EallocError`] under the same condition as [`Registry::composition_for`].
    pub fn attach_components(
        &self,
        entity: &Entity,
        added: Vec<AnyComponent>,
    ) -> Result<(), EallocError> {
        let source = entity.composition();
        let mut types = source.component_types.clone();
        for value in &added {
            let ty = (**value).type_id();
            assert!(!types.contains(&ty), "entity already carries a component of this type");
            types.push(ty);
        }
        let dest = self.composition_for(&types)?;
        Composition::migrate_entity(&dest, entity, added)
    }

    /// Drops the component types in `removed` from `entity`'s shape, migrating it into
    /// whichever composition covers the remainder.
    ///
    /// # Errors
    /// Returns [`EallocError`] under the same condition as [`Registry::composition_for`].
    pub fn detach_components(
        &self,
        entity: &Entity,
        removed: &[TypeId],
    ) -> Result<(), EallocError> {
        let source = entity.composition();
        let types: Vec<TypeId> =
            source.component_types.iter().copied().filter(|ty| !removed.contains(ty)).collect();
        assert_ne!(
            types.len(),
            source.component_types.len(),
            "no matching component type to remove from this entity"
        );
        let dest = self.composition_for(&types)?;
        Composition::migrate_entity(&dest, entity, Vec::new())
    }

    /// Every interned composition whose shape includes every type in `types` — the
    /// narrowing half of the world API's `findComponents(...).filter(...)` (§6); the
    /// typed query-builder sugar layered on top of the returned iterators is the
    /// façade's job, not this crate's.
    pub fn find_compositions(&self, types: &[TypeId]) -> Vec<Arc<Composition>> {
        self.compositions
            .read()
            .values()
            .filter(|composition| types.iter().all(|ty| composition.component_types.contains(ty)))
            .cloned()
            .collect()
    }

    /// Every live entity across every composition that includes `types`, optionally
    /// narrowed to just the chain currently in `state` rather than a full forward scan
    /// of each matching composition.
    #[auto_enums::auto_enum(Iterator)]
    pub fn find_entities<S: EnumState + Copy>(
        &self,
        types: &[TypeId],
        state: Option<S>,
    ) -> impl Iterator<Item = Entity> {
        let compositions = self.find_compositions(types);
        match state {
            None => compositions.into_iter().flat_map(|composition| composition.entities()),
            Some(state) => {
                compositions.into_iter().flat_map(move |composition| composition.iter_state(&state))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos(i32, i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Vel(i32, i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Hp(i32);

    #[test]
    fn same_shape_in_any_order_interns_once() {
        let registry = Registry::new(8);
        let a = registry.composition_for(&[TypeId::of::<Pos>(), TypeId::of::<Vel>()]).unwrap();
        let b = registry.composition_for(&[TypeId::of::<Vel>(), TypeId::of::<Pos>()]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn create_entity_interns_composition_on_first_use() {
        let registry = Registry::new(8);
        let entity =
            registry.create_entity(vec![Box::new(Pos(1, 2)), Box::new(Vel(0, 0))]).unwrap();
        let composition = entity.composition();
        assert!(composition.has::<Pos>());
        assert!(composition.has::<Vel>());
    }

    #[test]
    fn attach_then_detach_round_trips_through_migration() {
        let registry = Registry::new(8);
        let entity = registry.create_entity(vec![Box::new(Pos(1, 2))]).unwrap();

        registry.attach_components(&entity, vec![Box::new(Hp(10))]).unwrap();
        assert!(entity.composition().has::<Hp>());
        assert!(entity.composition().has::<Pos>());

        registry.detach_components(&entity, &[TypeId::of::<Pos>()]).unwrap();
        assert!(entity.composition().has::<Hp>());
        assert!(!entity.composition().has::<Pos>());
    }

    #[test]
    fn find_compositions_narrows_by_required_types() {
        let registry = Registry::new(8);
        registry.create_entity(vec![Box::new(Pos(0, 0))]).unwrap();
        registry.create_entity(vec![Box::new(Pos(0, 0)), Box::new(Vel(0, 0))]).unwrap();
        registry.create_entity(vec![Box::new(Hp(5))]).unwrap();

        let with_pos = registry.find_compositions(&[TypeId::of::<Pos>()]);
        assert_eq!(with_pos.len(), 2);
    }

    #[test]
    fn find_entities_without_state_scans_every_matching_composition() {
        let registry = Registry::new(8);
        registry.create_entity(vec![Box::new(Pos(0, 0))]).unwrap();
        registry.create_entity(vec![Box::new(Pos(0, 0)), Box::new(Vel(0, 0))]).unwrap();

        let found: Vec<_> =
            registry.find_entities::<crate::test_util::Mood>(&[TypeId::of::<Pos>()], None).collect();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn find_entities_with_state_only_yields_the_matching_chain() {
        use crate::test_util::Mood;

        let registry = Registry::new(8);
        let a = registry.create_entity(vec![Box::new(Pos(0, 0))]).unwrap();
        let b = registry.create_entity(vec![Box::new(Pos(1, 1))]).unwrap();
        a.composition().set_state(&a, Some(&Mood::Fighting));

        let found: Vec<_> = registry
            .find_entities(&[TypeId::of::<Pos>()], Some(Mood::Fighting))
            .collect();
        assert_eq!(found.len(), 1);
        assert!(found[0].ptr_eq(&a));
        let _ = &b;
    }
}
