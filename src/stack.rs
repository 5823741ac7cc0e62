//! A growable LIFO of recycled entity handles.

use crate::id::{RawId, DETACHED_BIT};

/// A LIFO of recycled [`RawId`]s.
///
/// `pop` returns [`DETACHED_BIT`] to signal an empty stack instead of an `Option`,
/// mirroring the sentinel-based contract of [`crate::id::IdSchema`]: a live id never
/// has bit 31 set, so the sentinel can never collide with a real recycled id. This
/// type is not internally synchronized; callers serialize access to it through the
/// owning tenant's allocation discipline (see [`crate::tenant::Tenant`]).
#[derive(Debug, Default)]
pub struct IdStack {
    data: Vec<RawId>,
}

impl IdStack {
    /// Creates an empty stack that will not reallocate until it holds more than
    /// `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self { IdStack { data: Vec::with_capacity(capacity) } }

    /// Pushes a freed id onto the stack.
    ///
    /// # Panics
    /// Panics in debug builds if `id` already carries the detached flag, since the
    /// stack stores ids that are still addressable (their chunk slot is being cleared
    /// by the same call, not their identity poisoned).
    pub fn push(&mut self, id: RawId) {
        debug_assert!(id & DETACHED_BIT == 0, "pushed id {id:#x} already has the detached bit set");
        self.data.push(id);
    }

    /// Pops the most recently freed id, or [`DETACHED_BIT`] if the stack is empty.
    pub fn pop(&mut self) -> RawId { self.data.pop().unwrap_or(DETACHED_BIT) }

    /// Number of ids currently recyclable.
    pub fn len(&self) -> usize { self.data.len() }

    /// Whether the stack holds no recyclable ids.
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_empty_returns_sentinel() {
        let mut stack = IdStack::with_capacity(4);
        assert_eq!(stack.pop(), DETACHED_BIT);
    }

    #[test]
    fn push_then_pop_is_lifo() {
        let mut stack = IdStack::with_capacity(4);
        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(stack.pop(), 3);
        assert_eq!(stack.pop(), 2);
        stack.push(4);
        assert_eq!(stack.pop(), 4);
        assert_eq!(stack.pop(), 1);
        assert_eq!(stack.pop(), DETACHED_BIT);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut stack = IdStack::with_capacity(2);
        for id in 0..100 {
            stack.push(id);
        }
        assert_eq!(stack.len(), 100);
        for id in (0..100).rev() {
            assert_eq!(stack.pop(), id);
        }
        assert!(stack.is_empty());
    }

    #[test]
    #[should_panic(expected = "detached bit set")]
    fn rejects_pushing_a_detached_id_in_debug() {
        let mut stack = IdStack::with_capacity(1);
        stack.push(DETACHED_BIT | 5);
    }
}
