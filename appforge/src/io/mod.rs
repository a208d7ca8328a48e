//! Side-effecting operations: agent invocation, filesystem verification,
//! process execution, provider HTTP, and state storage.

pub mod agent;
pub mod compiler;
pub mod config;
pub mod http;
pub mod paths;
pub mod plan_store;
pub mod process;
pub mod prompt;
pub mod verify;
