//! Compiler/build and launch contracts.
//!
//! The pipeline never parses diagnostics itself; it hands the captured text
//! to the Fix phase. Tests use scripted build runners.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::process::run_command;

/// One synchronous build attempt.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_dir: PathBuf,
    /// Target descriptor (scheme/product name) substituted into the command.
    pub target: String,
    /// Path to write the build log.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Result of one build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub success: bool,
    /// Captured compiler output; empty on success.
    pub diagnostics: String,
}

/// Abstraction over build backends.
pub trait BuildRunner {
    fn attempt_build(&self, request: &BuildRequest) -> Result<BuildOutcome>;
}

/// Launches the finished project (simulator/device). External collaborator;
/// the pipeline only consumes this boundary.
pub trait Launcher {
    fn launch(&self, project_dir: &Path, target: &str) -> Result<()>;
}

/// Build runner that executes a configured command, replacing `{target}`
/// tokens in the argv with the request's target descriptor.
pub struct CommandBuildRunner {
    command: Vec<String>,
}

impl CommandBuildRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl BuildRunner for CommandBuildRunner {
    #[instrument(skip_all, fields(target = %request.target))]
    fn attempt_build(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace("{target}", &request.target))
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("build command must not be empty"))?;

        info!(command = %argv.join(" "), "attempting build");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.project_dir);

        let output = run_command(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
            None,
        )
        .context("run build command")?;

        let log = output.combined();
        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create build log dir {}", parent.display()))?;
        }
        fs::write(&request.log_path, &log)
            .with_context(|| format!("write build log {}", request.log_path.display()))?;

        if output.timed_out {
            warn!("build timed out");
            return Ok(BuildOutcome {
                success: false,
                diagnostics: format!("build timed out after {:?}\n{log}", request.timeout),
            });
        }
        if output.status.success() {
            Ok(BuildOutcome {
                success: true,
                diagnostics: String::new(),
            })
        } else {
            Ok(BuildOutcome {
                success: false,
                diagnostics: log,
            })
        }
    }
}
