//! Autonomous app-build pipeline driving an external code-generation agent.
//!
//! This crate turns one natural-language product description into a verified
//! project by sequencing agent passes through Analyze, Plan, per-milestone
//! Build, FinalSweep, Fix, and Run phases. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan queries, completion
//!   reports, usage accounting, cancellation state). No I/O, fully testable
//!   in isolation.
//! - **[`io`]**: Side-effecting operations (agent invocation, filesystem
//!   verification, process execution, provider HTTP). Isolated to enable
//!   scripting in tests.
//!
//! Orchestration modules ([`pipeline`], [`milestone`], [`fix`]) coordinate
//! core logic with I/O to implement CLI commands. Backend integrations live
//! in [`provider`] behind capability interfaces.

pub mod core;
pub mod exit_codes;
pub mod fix;
pub mod io;
pub mod logging;
pub mod milestone;
pub mod pipeline;
pub mod provider;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
