/// The error type returned when a map could not allocate its initial table.
///
/// Growing an existing map never returns this error: a migration that cannot
/// allocate its destination table aborts the process through
/// [`std::alloc::handle_alloc_error`], because the threads participating in
/// that migration have no way to back out of it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested capacity cannot be rounded up to a power of two that
    /// fits in a `usize`.
    #[error("Requested capacity {requested} is too large for a leapfrog table")]
    CapacityOverflow { requested: usize },

    /// The allocator refused to provide memory for a table of `cells` cells.
    #[error("Failed to allocate a leapfrog table of {cells} cells")]
    AllocationFailed { cells: usize },
}
