//! Stable exit codes for appforge CLI commands.

/// Command succeeded: every planned file verified and the build compiled.
pub const OK: i32 = 0;
/// Command failed due to invalid config/plan/arguments or other errors.
pub const INVALID: i32 = 1;
/// Planned files remain missing or invalid after the final sweep.
pub const INCOMPLETE: i32 = 2;
/// Generation finished but the compile was never confirmed.
pub const NO_COMPILE: i32 = 3;
