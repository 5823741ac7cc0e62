//! Shape metadata, entity lifecycle, and state-chain management for one distinct
//! component shape.

pub mod state;

use std::any::TypeId;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::chunk::AnyComponent;
use crate::entity::{Entity, IndexKey, SlotData};
use crate::error::EallocError;
use crate::pool::ChunkedPool;
use crate::tenant::Tenant;
use state::EnumState;

pub mod iter;

/// Identifies a composition within a [`crate::registry::Registry`].
pub type CompositionId = u32;

/// An interned, immutable component shape: the set of component types an entity
/// carrying this composition holds, in the canonical order chosen when the shape was
/// first seen (§3 "Composition").
///
/// Owns exactly one [`Tenant`] (so exactly one private chunk list) and the concurrent
/// `states` index used for enumerated-state chains over entities of this shape.
pub struct Composition {
    pub(crate) id: CompositionId,
    /// Canonical order; `component_index` projects a class index to `1 + ` a position
    /// in this vec, so the two must always agree.
    pub(crate) component_types: Vec<TypeId>,
    /// `component_index[class_index] = 1 + ordinal`, `0` meaning absent. Sized to cover
    /// only the class indices this composition's own types were assigned; a lookup of
    /// an index past the end is treated as absent, which is correct since a type
    /// interned elsewhere after this composition was built cannot retroactively be
    /// part of it.
    pub(crate) component_index: Vec<u32>,
    pub(crate) pool: Arc<ChunkedPool>,
    pub(crate) tenant: Tenant,
    /// Head of each enumerated-state chain currently populated in this composition.
    pub(crate) states: RwLock<IndexMap<IndexKey, Entity>>,
    /// Writer-exclusive lock guarding chain surgery (promotion on collision, interior
    /// splice); see §4.7 "State management" and §5's per-composition chain lock.
    pub(crate) chain_lock: Mutex<()>,
}

impl Composition {
    pub(crate) fn new(
        id: CompositionId,
        component_types: Vec<TypeId>,
        pool: Arc<ChunkedPool>,
        subject: String,
    ) -> Result<Arc<Composition>, EallocError> {
        assert!(
            (1..=6).contains(&component_types.len()),
            "a composition holds between 1 and 6 component types, got {}",
            component_types.len()
        );

        let class_indices: Vec<u32> =
            component_types.iter().map(|ty| pool.class_index().get_or_create(*ty)).collect();
        let width = class_indices.iter().copied().max().map(|m| m as usize + 1).unwrap_or(0);
        let mut component_index = vec![0u32; width];
        for (ordinal, &class_index) in class_indices.iter().enumerate() {
            component_index[class_index as usize] = 1 + ordinal as u32;
        }

        let tenant = Tenant::new(id, pool.schema(), component_types.len(), &pool, subject)?;

        log::debug!(
            "interned composition of {} component types, id={id}",
            component_types.len()
        );

        Ok(Arc::new(Composition {
            id,
            component_types,
            component_index,
            pool,
            tenant,
            states: RwLock::new(IndexMap::new()),
            chain_lock: Mutex::new(()),
        }))
    }

    pub fn id(&self) -> CompositionId { self.id }

    pub fn arity(&self) -> usize { self.component_types.len() }

    /// Whether this composition includes component type `T`.
    pub fn has<T: 'static>(&self) -> bool { self.column_index::<T>().is_some() }

    /// This composition's column index for `T`, or `None` if `T` is not part of it.
    pub(crate) fn column_index<T: 'static>(&self) -> Option<usize> {
        let class_index = self.pool.class_index().get_index(TypeId::of::<T>())?;
        let entry = self.component_index.get(class_index as usize).copied().unwrap_or(0);
        (entry != 0).then(|| entry as usize - 1)
    }

    /// The chunks belonging to this composition's tenant, first to last, the order the
    /// canonical forward scan (§4.8) visits them in.
    pub(crate) fn chunks_forward(&self) -> Vec<Arc<crate::chunk::LinkedChunk>> {
        let mut out = Vec::new();
        let mut current = self.pool.chunk(self.tenant.first_chunk());
        while let Some(chunk) = current {
            let next = chunk.next();
            out.push(chunk);
            current = next.and_then(|id| self.pool.chunk(id));
        }
        out
    }

    /// Creates a new entity owning `components`, one value per declared component type
    /// in any order (§4.7 step 1 reorders them into canonical position).
    ///
    /// # Errors
    /// Returns [`EallocError`] if this composition's tenant needs a new chunk to place
    /// the entity and the pool has none left to give (§7 "Out-of-capacity").
    pub fn create_entity(
        self: &Arc<Self>,
        components: Vec<AnyComponent>,
    ) -> Result<Entity, EallocError> {
        assert_eq!(
            components.len(),
            self.component_types.len(),
            "component tuple arity does not match this composition"
        );

        let mut ordered: Vec<Option<AnyComponent>> =
            (0..components.len()).map(|_| None).collect();
        for value in components {
            let ty = (*value).type_id();
            let pos = self
                .component_types
                .iter()
                .position(|t| *t == ty)
                .expect("component type is not part of this composition");
            ordered[pos] = Some(value);
        }
        let ordered: Vec<AnyComponent> = ordered
            .into_iter()
            .map(|v| v.expect("every declared column must receive a value at creation"))
            .collect();

        let raw_id = self.tenant.allocate_id(&self.pool)?;
        let entity = Entity::new(raw_id, Arc::clone(self));
        let chunk = self
            .pool
            .chunk(self.pool.schema().chunk_of(raw_id))
            .expect("allocate_id always returns a live chunk");
        chunk.store(self.pool.schema().object_of(raw_id), entity.clone(), ordered);

        log::trace!("composition {} created entity {:#x}", self.id, raw_id);
        Ok(entity)
    }

    /// Removes `entity` entirely: detaches it from any state chain, frees its id.
    pub fn delete_entity(&self, entity: &Entity) {
        self.detach_state(entity);
        let raw_id = entity.id();
        self.tenant.free_id(raw_id, &self.pool);
        log::trace!("composition {} deleted entity {:#x}", self.id, raw_id);
    }

    /// Migrates `entity` from its current composition into `dest`, adding `added`
    /// (already-boxed, arbitrary order) as new components. Implements §4.7's
    /// `attachEntity`/`reattachEntity`: both add and remove are expressed the same way,
    /// since `dest`'s type set already encodes which of the source's columns survive.
    ///
    /// # Errors
    /// Returns [`EallocError`] if `dest`'s tenant needs a new chunk and the pool has
    /// none left to give (§7 "Out-of-capacity"). The entity is left unmodified in that
    /// case — nothing has been published or freed yet.
    pub fn migrate_entity(
        dest: &Arc<Composition>,
        entity: &Entity,
        added: Vec<AnyComponent>,
    ) -> Result<(), EallocError> {
        let snapshot = entity.snapshot();
        let src = Arc::clone(&snapshot.composition);
        assert!(
            !Arc::ptr_eq(&src, dest),
            "migrate_entity called with the entity's current composition as the destination"
        );

        let src_id = snapshot.id;
        let src_chunk = src
            .pool
            .chunk(src.pool.schema().chunk_of(src_id))
            .expect("entity's current chunk exists");
        let src_object = src.pool.schema().object_of(src_id);

        let index_mapping: Vec<Option<usize>> = src
            .component_types
            .iter()
            .map(|ty| dest.component_types.iter().position(|t| t == ty))
            .collect();

        let new_id = dest.tenant.allocate_id(&dest.pool)?;
        let dest_chunk = dest
            .pool
            .chunk(dest.pool.schema().chunk_of(new_id))
            .expect("allocate_id always returns a live chunk");
        let dest_object = dest.pool.schema().object_of(new_id);

        dest_chunk.copy_from(dest_object, &src_chunk, src_object, &index_mapping);

        let added_mapping: Vec<(usize, AnyComponent)> = added
            .into_iter()
            .map(|value| {
                let ty = (*value).type_id();
                let pos = dest
                    .component_types
                    .iter()
                    .position(|t| *t == ty)
                    .expect("added component type is not part of the destination composition");
                (pos, value)
            })
            .collect();
        dest_chunk.add(dest_object, added_mapping);
        dest_chunk.bind(dest_object, entity.clone());

        entity.publish(SlotData { id: new_id, composition: Arc::clone(dest), state_root: snapshot.state_root });

        src.tenant.free_id(src_id, &src.pool);
        log::debug!("entity migrated from composition {} to {}", src.id, dest.id);
        Ok(())
    }

    pub(crate) fn key_for<S: EnumState>(&self, state: &S) -> IndexKey {
        let class_index = self.pool.class_index().get_or_create(TypeId::of::<S>());
        IndexKey::new(class_index, state.ordinal())
    }

    /// Sets (or, with `None`, clears) the enumerated state `entity` participates in.
    pub fn set_state<S: EnumState>(&self, entity: &Entity, state: Option<&S>) {
        self.detach_state(entity);
        if let Some(state) = state {
            self.attach_state(entity, state);
        }
    }

    fn attach_state<S: EnumState>(&self, entity: &Entity, state: &S) {
        let key = self.key_for(state);
        let _guard = self.chain_lock.lock();
        let mut states = self.states.write();
        match states.get(&key).cloned() {
            None => {
                entity.set_state_root(Some(key));
                states.insert(key, entity.clone());
            }
            Some(old_head) => {
                entity.links().prev = Some(old_head.clone());
                old_head.links().next = Some(entity.clone());
                entity.set_state_root(Some(key));
                old_head.set_state_root(None);
                states.insert(key, entity.clone());
            }
        }
    }

    /// Three sub-cases per §4.7 "Detach": head-and-alone removes the map entry,
    /// head-with-predecessors promotes `prev` to head, interior splices the entity out.
    /// A no-op if `entity` is not currently in any chain.
    fn detach_state(&self, entity: &Entity) {
        let _guard = self.chain_lock.lock();

        if let Some(key) = entity.state_root() {
            let prev = entity.links().prev.clone();
            match prev {
                None => {
                    self.states.write().remove(&key);
                }
                Some(prev_entity) => {
                    prev_entity.links().next = None;
                    prev_entity.set_state_root(Some(key));
                    self.states.write().insert(key, prev_entity);
                }
            }
        } else {
            let (prev, next) = {
                let links = entity.links();
                (links.prev.clone(), links.next.clone())
            };
            if prev.is_none() && next.is_none() {
                return;
            }
            if let Some(ref p) = prev {
                p.links().next = next.clone();
            }
            if let Some(ref n) = next {
                n.links().prev = prev.clone();
            }
        }

        let mut links = entity.links();
        links.prev = None;
        links.next = None;
    }
}

#[cfg(test)]
impl Composition {
    /// A composition with `data_len` distinct (otherwise meaningless) marker component
    /// types, owning a fresh pool and tenant of its own. For unit tests elsewhere in the
    /// crate that only need *some* composition identity to build an
    /// [`crate::entity::Entity`] with — see [`crate::test_util::dummy_composition`].
    pub(crate) fn stub_for_tests(data_len: usize) -> Arc<Composition> {
        struct M0;
        struct M1;
        struct M2;
        struct M3;
        struct M4;
        struct M5;

        assert!((1..=6).contains(&data_len));
        let all =
            [TypeId::of::<M0>(), TypeId::of::<M1>(), TypeId::of::<M2>(), TypeId::of::<M3>(), TypeId::of::<M4>(), TypeId::of::<M5>()];
        let component_types = all[..data_len].to_vec();

        let class_index = Arc::new(crate::class_index::ClassIndex::default());
        let pool = Arc::new(ChunkedPool::new(crate::id::IdSchema::new(8), class_index));
        Composition::new(0, component_types, pool, "test".into()).expect("fresh pool has capacity")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos(i32, i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Vel(i32, i32);

    fn pool_and_types() -> (Arc<ChunkedPool>, Vec<TypeId>) {
        let class_index = Arc::new(crate::class_index::ClassIndex::default());
        let pool = Arc::new(ChunkedPool::new(crate::id::IdSchema::new(8), class_index));
        (pool, vec![TypeId::of::<Pos>(), TypeId::of::<Vel>()])
    }

    #[test]
    fn create_entity_reorders_components_into_canonical_order() {
        let (pool, types) = pool_and_types();
        let composition = Composition::new(0, types, pool, "Pos+Vel".into()).unwrap();
        // Pass Vel before Pos; composition must reorder them by type, not by argument order.
        let entity =
            composition.create_entity(vec![Box::new(Vel(1, 1)), Box::new(Pos(0, 0))]).unwrap();
        assert!(composition.has::<Pos>());
        assert!(composition.has::<Vel>());
        assert!(!composition.has::<u32>());
        let _ = entity;
    }

    #[test]
    fn migration_moves_surviving_column_and_adds_new_one() {
        let class_index = Arc::new(crate::class_index::ClassIndex::default());
        let pool = Arc::new(ChunkedPool::new(crate::id::IdSchema::new(8), class_index));
        let a = Composition::new(0, vec![TypeId::of::<Pos>()], Arc::clone(&pool), "A".into())
            .unwrap();
        let b = Composition::new(
            1,
            vec![TypeId::of::<Pos>(), TypeId::of::<Vel>()],
            Arc::clone(&pool),
            "B".into(),
        )
        .unwrap();

        let entity = a.create_entity(vec![Box::new(Pos(3, 4))]).unwrap();
        Composition::migrate_entity(&b, &entity, vec![Box::new(Vel(9, 9))]).unwrap();

        assert!(Arc::ptr_eq(&entity.composition(), &b));
        let results: Vec<_> = b.select2::<Pos, Vel>().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, Pos(3, 4));
        assert_eq!(results[0].1, Vel(9, 9));
    }

    #[test]
    fn state_chain_head_promotion_and_interior_splice_match_scenario_5() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        struct Fighting;
        impl EnumState for Fighting {
            fn ordinal(&self) -> u32 { 0 }
        }

        let (pool, types) = pool_and_types();
        let composition = Composition::new(0, types, pool, "Pos+Vel".into()).unwrap();
        let e1 =
            composition.create_entity(vec![Box::new(Pos(0, 0)), Box::new(Vel(0, 0))]).unwrap();
        let e2 =
            composition.create_entity(vec![Box::new(Pos(1, 1)), Box::new(Vel(1, 1))]).unwrap();
        let e3 =
            composition.create_entity(vec![Box::new(Pos(2, 2)), Box::new(Vel(2, 2))]).unwrap();

        composition.set_state(&e1, Some(&Fighting));
        composition.set_state(&e2, Some(&Fighting));
        composition.set_state(&e3, Some(&Fighting));

        let chain: Vec<_> = composition.iter_state(&Fighting).collect();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].ptr_eq(&e3));
        assert!(chain[1].ptr_eq(&e2));
        assert!(chain[2].ptr_eq(&e1));

        composition.set_state::<Fighting>(&e2, None);
        let chain: Vec<_> = composition.iter_state(&Fighting).collect();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].ptr_eq(&e3));
        assert!(chain[1].ptr_eq(&e1));
    }

    #[test]
    fn deleted_entity_frees_its_id_for_reuse() {
        let (pool, types) = pool_and_types();
        let composition = Composition::new(0, types, pool, "Pos+Vel".into()).unwrap();
        let e1 =
            composition.create_entity(vec![Box::new(Pos(0, 0)), Box::new(Vel(0, 0))]).unwrap();
        let id = e1.id();
        composition.delete_entity(&e1);
        let e2 =
            composition.create_entity(vec![Box::new(Pos(9, 9)), Box::new(Vel(9, 9))]).unwrap();
        assert_eq!(e2.id(), id);
    }
}
