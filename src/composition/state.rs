//! The trait enumerated state values implement so [`super::Composition`] can derive an
//! [`crate::entity::IndexKey`] from them.

/// A value from a small, closed enumeration that can participate in a composition's
/// state chains (§4.7 "State management").
///
/// Implementors are almost always a unit-only `enum`; `ordinal` should return a stable,
/// densely packed discriminant (`0..N`), the same way `strum::EnumIter`-derived test
/// fixtures number their variants.
pub trait EnumState: 'static {
    fn ordinal(&self) -> u32;
}
