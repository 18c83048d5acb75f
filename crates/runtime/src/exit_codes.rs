//! Process exit statuses.

/// Pipeline completed, was shut down gracefully, or help/version/configtest succeeded.
pub const OK: i32 = 0;
/// Invalid, missing or contradictory command-line arguments.
pub const USAGE: i32 = 1;
/// The pipeline could not be constructed or failed while running.
pub const FAILURE: i32 = 2;
