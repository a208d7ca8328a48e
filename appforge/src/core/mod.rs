//! Pure, deterministic pipeline logic.
//!
//! Nothing in this module touches the filesystem, the network, or a child
//! process. Plan queries, report aggregation, usage accounting, and the
//! cancel slot are all testable without any I/O.

pub mod cancel;
pub mod plan;
pub mod report;
pub mod usage;
