//! Generation-agent contract and the `claude` CLI backend.
//!
//! The [`GenerationAgent`] trait decouples the build loop from the actual
//! agent backend. Tests use scripted agents that return predetermined
//! responses (and optionally write files) without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::{CancelSlot, CancelledError};
use crate::core::usage::PassUsage;
use crate::io::process::run_command;

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent (the project root).
    pub workdir: PathBuf,
    /// System instructions for this pass.
    pub system_prompt: String,
    /// User message for this pass.
    pub user_message: String,
    /// Reference images the agent should consult, if any.
    pub image_paths: Vec<PathBuf>,
    /// Continuation token from an earlier call; `None` starts fresh.
    pub session: Option<String>,
    /// Tools the agent is allowed to invoke.
    pub allowed_tools: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Final aggregated response from one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub text: String,
    /// Continuation token for the next call, if the backend issued one.
    pub session: Option<String>,
    pub usage: PassUsage,
    /// The agent ran to completion but reported its own failure.
    pub is_error: bool,
}

/// Abstraction over generation-agent backends.
pub trait GenerationAgent {
    /// Issue one call. `Err` means a transport/process failure or
    /// cancellation; an unsatisfying-but-successful response is `Ok`.
    fn generate(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Backend that spawns the `claude` CLI in print mode.
pub struct ClaudeAgent {
    cancel: Arc<CancelSlot>,
}

impl ClaudeAgent {
    pub fn new(cancel: Arc<CancelSlot>) -> Self {
        Self { cancel }
    }
}

impl GenerationAgent for ClaudeAgent {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), resuming = request.session.is_some()))]
    fn generate(&self, request: &AgentRequest) -> Result<AgentResponse> {
        info!(workdir = %request.workdir.display(), "starting claude call");

        let mut cmd = Command::new("claude");
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--append-system-prompt")
            .arg(&request.system_prompt);
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(request.allowed_tools.join(","));
        }
        if let Some(session) = &request.session {
            cmd.arg("--resume").arg(session);
        }
        cmd.current_dir(&request.workdir);

        let mut message = request.user_message.clone();
        if !request.image_paths.is_empty() {
            message.push_str("\n\nReference images:\n");
            for path in &request.image_paths {
                message.push_str(&format!("- {}\n", path.display()));
            }
        }

        let output = run_command(
            cmd,
            Some(message.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            Some(&self.cancel),
        )
        .context("run claude")?;

        if output.cancelled {
            warn!("claude call cancelled");
            return Err(anyhow::Error::new(CancelledError));
        }
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "claude call timed out");
            return Err(anyhow!("claude timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "claude exited nonzero");
            return Err(anyhow!(
                "claude failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let response = parse_envelope(&output.stdout)?;
        debug!(is_error = response.is_error, session = ?response.session, "parsed claude envelope");
        Ok(response)
    }
}

/// Final JSON envelope emitted by `claude --output-format json`.
#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: Option<EnvelopeUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

fn parse_envelope(stdout: &[u8]) -> Result<AgentResponse> {
    let raw = String::from_utf8_lossy(stdout);
    let envelope: ResultEnvelope =
        serde_json::from_str(raw.trim()).context("parse claude result envelope")?;
    let usage = envelope.usage.unwrap_or_default();
    Ok(AgentResponse {
        text: envelope.result.unwrap_or_default(),
        session: envelope.session_id.filter(|s| !s.is_empty()),
        usage: PassUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_write_tokens: usage.cache_creation_input_tokens,
            cost_usd: envelope.total_cost_usd.unwrap_or(0.0),
        },
        is_error: envelope.is_error,
    })
}

/// Issue one call and persist the prompt/response pair under `pass_dir`.
///
/// Pass artifacts are product output (always written), unlike tracing which
/// is dev-only diagnostics.
pub fn execute_recorded<A: GenerationAgent>(
    agent: &A,
    request: &AgentRequest,
    pass_dir: &Path,
) -> Result<AgentResponse> {
    fs::create_dir_all(pass_dir)
        .with_context(|| format!("create pass dir {}", pass_dir.display()))?;
    let prompt = format!(
        "=== system ===\n{}\n\n=== user ===\n{}\n",
        request.system_prompt, request.user_message
    );
    fs::write(pass_dir.join("prompt.md"), prompt)
        .with_context(|| format!("write prompt under {}", pass_dir.display()))?;

    let response = agent.generate(request)?;

    fs::write(pass_dir.join("response.md"), &response.text)
        .with_context(|| format!("write response under {}", pass_dir.display()))?;
    Ok(response)
}
