//! Shared fixtures for unit tests scattered across modules, mirroring the teacher
//! crate's own `test_util` module (simple component/state fixtures reused by many
//! `#[cfg(test)]` submodules instead of being redefined in each one).

#![cfg(test)]

use std::sync::Arc;

use parking_lot::Once;

use crate::composition::Composition;

/// Initializes `env_logger` once per test process, the same `Once`-guarded pattern the
/// teacher crate's own `test_util::init` uses so concurrent tests can opt into seeing
/// `trace!`/`debug!` output (via `RUST_LOG`) without double-initializing the global
/// logger when many tests run in the same process.
pub(crate) fn init() {
    static SET_LOGGER_ONCE: Once = Once::new();
    SET_LOGGER_ONCE.call_once(env_logger::init);
}

/// A composition with `data_len` component columns, owning a freshly created pool and
/// tenant of its own. Good enough for chunk/entity unit tests that only need *some*
/// composition identity to construct an [`crate::entity::Entity`] with, and not
/// plumbed through a shared registry.
pub(crate) fn dummy_composition(data_len: usize) -> Arc<Composition> {
    Composition::stub_for_tests(data_len)
}

/// A small enumerated state type used by state-chain tests, `EnumIter`-derived the way
/// the teacher crate derives test fixtures with `strum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
pub(crate) enum Mood {
    Idle,
    Walking,
    Fighting,
}

impl crate::composition::state::EnumState for Mood {
    fn ordinal(&self) -> u32 { *self as u32 }
}
