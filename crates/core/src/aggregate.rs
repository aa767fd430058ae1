//! Aggregate root trait for mutable domain aggregates.

/// Aggregate root marker + minimal interface.
///
/// Intentionally small: modules decide how they model state transitions
/// without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Bumped once per committed modification.
    fn version(&self) -> u64;
}
