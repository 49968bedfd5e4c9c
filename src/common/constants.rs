/// Number of cells in a freshly created table, and the smallest table a
/// migration will ever allocate.
pub(crate) const INITIAL_SIZE: usize = 8;

/// Number of source cells a migration worker claims at once.
pub(crate) const TABLE_MIGRATION_UNIT_SIZE: usize = 32;

/// How far past the end of a bucket's link chain an insert is allowed to probe
/// before reporting an overflow. Must fit in a cell group delta (`u8`).
pub(crate) const LINEAR_SEARCH_LIMIT: usize = 128;

/// Number of cells sampled to estimate the live-cell density when sizing the
/// destination table of a migration.
pub(crate) const CELLS_IN_USE_SAMPLE: usize = LINEAR_SEARCH_LIMIT;

const _: () = assert!(LINEAR_SEARCH_LIMIT > 0 && LINEAR_SEARCH_LIMIT < 256);
const _: () = assert!(CELLS_IN_USE_SAMPLE > 0 && CELLS_IN_USE_SAMPLE <= LINEAR_SEARCH_LIMIT);
const _: () = assert!(INITIAL_SIZE.is_power_of_two() && INITIAL_SIZE >= 4);
