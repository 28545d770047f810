//! Stable exit codes for guardian CLI commands.

/// Command succeeded; for `run`, every subject's test passed.
pub const OK: i32 = 0;
/// Invalid invocation, config or manifest, or another error before the run started.
pub const INVALID: i32 = 1;
/// `guardian run` finished but at least one subject did not succeed.
pub const FAILURES: i32 = 2;
