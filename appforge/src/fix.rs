//! Fix loop: confirm the generated project compiles, repairing on failure.
//!
//! An unconfirmed compile after the repair budget is exhausted is a data
//! outcome, not an error. The caller reports it and downgrades the exit
//! code; only transport failures and cancellation propagate as `Err`.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::usage::SessionTracker;
use crate::io::agent::GenerationAgent;
use crate::io::compiler::{BuildRequest, BuildRunner};
use crate::milestone::{LoopContext, run_pass};
use std::time::Duration;

/// Final compile state after the fix loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStatus {
    /// A build attempt succeeded.
    Succeeded { attempts: u32 },
    /// Every attempt failed within the repair budget.
    Unconfirmed {
        attempts: u32,
        last_diagnostics: String,
    },
}

impl CompileStatus {
    pub fn confirmed(&self) -> bool {
        matches!(self, CompileStatus::Succeeded { .. })
    }
}

/// Build once; on failure, alternate repair passes and rebuilds until the
/// build succeeds or `max_fix_attempts` repairs have been spent.
#[instrument(skip_all, fields(build_target = target))]
pub fn run_fix_loop<A: GenerationAgent, B: BuildRunner>(
    agent: &A,
    builder: &B,
    target: &str,
    ctx: &LoopContext<'_>,
    tracker: &mut SessionTracker,
) -> Result<CompileStatus> {
    let request = BuildRequest {
        project_dir: ctx.paths.root.clone(),
        target: target.to_string(),
        log_path: ctx.paths.build_log_path.clone(),
        timeout: Duration::from_secs(ctx.config.build_timeout_secs),
        output_limit_bytes: ctx.config.build_output_limit_bytes,
    };

    let mut outcome = builder.attempt_build(&request).context("initial build")?;
    let mut attempts = 1;
    if outcome.success {
        info!("build succeeded on first attempt");
        return Ok(CompileStatus::Succeeded { attempts });
    }

    for fix in 1..=ctx.config.max_fix_attempts {
        warn!(fix, "build failed, issuing repair pass");
        let pack = ctx.prompts.fix_pass(target, &outcome.diagnostics)?;
        let tools = ctx.config.base_allowed_tools.clone();
        run_pass(agent, ctx, pack, &tools, "fix", fix, tracker)?;

        outcome = builder
            .attempt_build(&request)
            .with_context(|| format!("rebuild after fix {fix}"))?;
        attempts += 1;
        if outcome.success {
            info!(fix, "build succeeded after repair");
            return Ok(CompileStatus::Succeeded { attempts });
        }
    }

    warn!(attempts, "compile unconfirmed after repair budget");
    Ok(CompileStatus::Unconfirmed {
        attempts,
        last_diagnostics: outcome.diagnostics,
    })
}
