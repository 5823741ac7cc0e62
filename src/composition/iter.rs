//! Typed projections over one composition's entities (§4.8 "Iterators").
//!
//! A canonical forward scan visits a tenant's chunks first to last; within each chunk it
//! walks slots from the high water mark down to zero, skipping empty slots. Each
//! candidate entity is re-checked against this composition's identity before it is
//! yielded, since an entity migrated away mid-scan still occupies its old slot until the
//! chunk's column values are overwritten by whoever claims that id next.
//!
//! The other axis (§4.8 "with-state") walks a state chain instead of a tenant's chunks
//! and, for each chained entity, reads components out of wherever that entity currently
//! lives rather than a fixed chunk list, since a state chain can span more than one
//! composition after a migration carries its `state_root` over.

use std::sync::Arc;

use crate::chunk::LinkedChunk;
use crate::entity::Entity;

use super::state::EnumState;
use super::Composition;

impl Composition {
    /// `(chunk, object_id, entity)` triples for every live entity still carrying this
    /// composition, newest chunk entries within each chunk first. Shared by every
    /// `selectN` below and by [`Composition::entities`].
    fn scan_raw(self: &Arc<Self>) -> impl Iterator<Item = (Arc<LinkedChunk>, u32, Entity)> {
        let target = Arc::clone(self);
        self.chunks_forward().into_iter().flat_map(move |chunk| {
            let hwm = chunk.high_water_mark();
            let target = Arc::clone(&target);
            (0..hwm).rev().filter_map(move |object_id| {
                let entity = chunk.load(object_id)?;
                if Arc::ptr_eq(&entity.composition(), &target) {
                    Some((Arc::clone(&chunk), object_id, entity))
                } else {
                    None
                }
            })
        })
    }

    /// Every live entity currently carrying this composition, in forward scan order.
    pub fn entities(self: &Arc<Self>) -> impl Iterator<Item = Entity> {
        self.scan_raw().map(|(_chunk, _object_id, entity)| entity)
    }

    /// Entities currently at the head of (and chained behind) the state `state`, in
    /// most-recently-attached-first order (§4.7: attach always promotes to the chain
    /// head). Empty if no entity currently holds this state.
    pub fn iter_state<S: EnumState>(&self, state: &S) -> StateChainIter {
        let key = self.key_for(state);
        let head = self.states.read().get(&key).cloned();
        StateChainIter { current: head }
    }
}

/// Walks a state chain from its head back toward the first entity ever attached to it,
/// following each entity's `prev` intrusive pointer (§4.7 "State-chain iteration").
pub struct StateChainIter {
    current: Option<Entity>,
}

impl Iterator for StateChainIter {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let entity = self.current.take()?;
        self.current = entity.links().prev.clone();
        Some(entity)
    }
}

/// Reads `T` out of `entity`'s *current* chunk, wherever that is right now.
///
/// State chains cross composition boundaries (an entity keeps its state root across a
/// migration, per [`super::Composition::migrate_entity`]), so a with-state scan cannot
/// assume every chained entity still lives in the chunk the scan started from; it must
/// follow each entity's own up-to-date `(composition, id)` instead (§4.8 "with-state").
/// Returns `None` if `T` is not part of whatever composition `entity` currently belongs
/// to, or if the entity was deleted out from under the caller.
pub fn read_component<T: Clone + 'static>(entity: &Entity) -> Option<T> {
    let snapshot = entity.snapshot();
    let composition = &snapshot.composition;
    let column = composition.column_index::<T>()?;
    let chunk = composition.pool.chunk(composition.pool.schema().chunk_of(snapshot.id))?;
    chunk.with_component::<T, _>(column, composition.pool.schema().object_of(snapshot.id), |v| v.cloned())
}

macro_rules! impl_select {
    ($name:ident; $($t:ident : $idx:ident),+) => {
        impl Composition {
            /// Forward-scans this composition yielding cloned component tuples, skipping
            /// any slot whose entity has migrated to a different composition since the
            /// scan's underlying chunk list was captured.
            pub fn $name<$($t: Clone + 'static),+>(
                self: &Arc<Self>,
            ) -> impl Iterator<Item = ($($t,)+)> {
                $(
                    let $idx = self
                        .column_index::<$t>()
                        .unwrap_or_else(|| panic!("{} is not part of this composition", stringify!($t)));
                )+
                self.scan_raw().map(move |(chunk, object_id, _entity)| {
                    ($(
                        chunk.with_component::<$t, _>($idx, object_id, |v| {
                            v.cloned().expect("component missing for a live entity")
                        }),
                    )+)
                })
            }
        }
    };
}

impl_select!(select1; T1: i1);
impl_select!(select2; T1: i1, T2: i2);
impl_select!(select3; T1: i1, T2: i2, T3: i3);
impl_select!(select4; T1: i1, T2: i2, T3: i3, T4: i4);
impl_select!(select5; T1: i1, T2: i2, T3: i3, T4: i4, T5: i5);
impl_select!(select6; T1: i1, T2: i2, T3: i3, T4: i4, T5: i5, T6: i6);

macro_rules! impl_select_state {
    ($name:ident; $($t:ident),+) => {
        impl Composition {
            /// Entities currently chained under `state` (most-recently-attached-first,
            /// per [`Composition::iter_state`]), each paired with cloned values for the
            /// requested component types read from that entity's own *current* chunk
            /// (§4.8 "with-state"). A state chain can outlive a migration across
            /// composition boundaries (`migrate_entity` carries `state_root` over to
            /// `dest`), so this reads each entity's live `(composition, id)` rather
            /// than assuming every chained entity still lives in one composition's
            /// columns; a chained entity that has since migrated to a composition
            /// missing one of `$t` is silently skipped.
            pub fn $name<S: EnumState, $($t: Clone + 'static),+>(
                &self,
                state: &S,
            ) -> impl Iterator<Item = ($($t,)+ Entity)> + '_ {
                self.iter_state(state).filter_map(|entity| {
                    $(
                        let $t = read_component::<$t>(&entity)?;
                    )+
                    Some(($($t,)+ entity))
                })
            }
        }
    };
}

impl_select_state!(select1_state; T1);
impl_select_state!(select2_state; T1, T2);
impl_select_state!(select3_state; T1, T2, T3);
impl_select_state!(select4_state; T1, T2, T3, T4);
impl_select_state!(select5_state; T1, T2, T3, T4, T5);
impl_select_state!(select6_state; T1, T2, T3, T4, T5, T6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SlotData;
    use crate::pool::ChunkedPool;
    use std::any::TypeId;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos(i32, i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Vel(i32, i32);

    fn fresh_composition(types: Vec<TypeId>) -> Arc<Composition> {
        let class_index = Arc::new(crate::class_index::ClassIndex::default());
        let pool = Arc::new(ChunkedPool::new(crate::id::IdSchema::new(8), class_index));
        Composition::new(0, types, pool, "Pos+Vel".into()).unwrap()
    }

    #[test]
    fn select2_yields_every_live_entity_once() {
        let composition = fresh_composition(vec![TypeId::of::<Pos>(), TypeId::of::<Vel>()]);
        composition
            .create_entity(vec![Box::new(Pos(1, 1)), Box::new(Vel(0, 0))])
            .unwrap();
        composition
            .create_entity(vec![Box::new(Pos(2, 2)), Box::new(Vel(0, 0))])
            .unwrap();

        let mut results: Vec<_> = composition.select2::<Pos, Vel>().map(|(p, _v)| p).collect();
        results.sort_by_key(|p| p.0);
        assert_eq!(results, vec![Pos(1, 1), Pos(2, 2)]);
    }

    #[test]
    fn select_skips_entity_migrated_away_mid_scan() {
        let composition = fresh_composition(vec![TypeId::of::<Pos>()]);
        let dest = fresh_composition(vec![TypeId::of::<Vel>()]);
        let e1 = composition.create_entity(vec![Box::new(Pos(1, 1))]).unwrap();
        composition.create_entity(vec![Box::new(Pos(2, 2))]).unwrap();

        Composition::migrate_entity(&dest, &e1, vec![Box::new(Vel(9, 9))]).unwrap();

        let remaining: Vec<_> = composition.select1::<Pos>().collect();
        assert_eq!(remaining, vec![(Pos(2, 2),)]);
    }

    #[test]
    fn entities_reports_only_live_membership() {
        let composition = fresh_composition(vec![TypeId::of::<Pos>()]);
        let e1 = composition.create_entity(vec![Box::new(Pos(1, 1))]).unwrap();
        let e2 = composition.create_entity(vec![Box::new(Pos(2, 2))]).unwrap();

        let ids: Vec<_> = composition.entities().map(|e| e.id()).collect();
        assert!(ids.contains(&e1.id()));
        assert!(ids.contains(&e2.id()));
        assert_eq!(ids.len(), 2);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Fighting;
    impl super::super::state::EnumState for Fighting {
        fn ordinal(&self) -> u32 { 0 }
    }

    #[test]
    fn select_state_reads_each_chained_entitys_own_current_chunk() {
        let composition = fresh_composition(vec![TypeId::of::<Pos>()]);
        let dest = fresh_composition(vec![TypeId::of::<Pos>(), TypeId::of::<Vel>()]);

        let stays = composition.create_entity(vec![Box::new(Pos(1, 1))]).unwrap();
        let migrates = composition.create_entity(vec![Box::new(Pos(2, 2))]).unwrap();
        composition.set_state(&stays, Some(&Fighting));
        composition.set_state(&migrates, Some(&Fighting));

        // `migrates` keeps its state root across the migration (§4.7 `migrate_entity`),
        // so the chain still includes it, but `select1_state::<Pos>` must read `Pos`
        // out of `dest`'s chunk now, not `composition`'s.
        Composition::migrate_entity(&dest, &migrates, vec![Box::new(Vel(9, 9))]).unwrap();

        let mut positions: Vec<_> =
            composition.select1_state::<Fighting, Pos>(&Fighting).map(|(p, _e)| p).collect();
        positions.sort_by_key(|p| p.0);
        assert_eq!(positions, vec![Pos(1, 1), Pos(2, 2)]);
    }

    #[test]
    fn select_state_skips_a_chained_entity_that_migrated_away_from_the_requested_type() {
        let composition = fresh_composition(vec![TypeId::of::<Pos>()]);
        let dest = fresh_composition(vec![TypeId::of::<Vel>()]);

        let migrates = composition.create_entity(vec![Box::new(Pos(2, 2))]).unwrap();
        composition.set_state(&migrates, Some(&Fighting));
        Composition::migrate_entity(&dest, &migrates, vec![Box::new(Vel(9, 9))]).unwrap();

        // `migrates` is still chained under `Fighting` but no longer carries `Pos`,
        // so a with-state `Pos` read must skip it rather than panic or yield a stale
        // value out of a chunk it no longer occupies.
        let positions: Vec<_> = composition.select1_state::<Fighting, Pos>(&Fighting).collect();
        assert!(positions.is_empty());
    }

    #[test]
    fn scan_raw_skips_entity_whose_publish_outran_its_old_slot_clearing() {
        // White-box reproduction of the race window `scan_raw`'s composition-identity
        // check guards against. A real migration always frees the old slot after
        // publishing the new composition, so an end-to-end test never observes the old
        // slot still populated once the new composition is visible; this drives the
        // two halves of that transition apart directly. The old chunk slot is left
        // `Some(entity)` (so `chunk.load` alone would still yield it); only the
        // `Arc::ptr_eq` check against `self` is what filters it out of this
        // composition's own scan.
        let composition = fresh_composition(vec![TypeId::of::<Pos>()]);
        let dest = fresh_composition(vec![TypeId::of::<Vel>()]);

        let entity = composition.create_entity(vec![Box::new(Pos(1, 1))]).unwrap();
        let snapshot = entity.snapshot();

        entity.publish(SlotData {
            id: snapshot.id,
            composition: Arc::clone(&dest),
            state_root: snapshot.state_root,
        });

        let remaining: Vec<_> = composition.entities().collect();
        assert!(
            remaining.is_empty(),
            "composition-identity check must skip the entity even though its old slot is still populated"
        );
    }
}
