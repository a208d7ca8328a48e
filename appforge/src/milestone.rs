//! Milestone build loop: drive one milestone's files to completion.
//!
//! Pass 1 issues full build instructions scoped to the milestone's files;
//! later passes issue targeted completion instructions naming only the
//! unresolved files. The verifier runs after every pass. Exhausting the
//! retry budget is a partial-success outcome, not an error — the phase
//! sequencer's final sweep is the safety net. Only transport failures and
//! cancellation abort the milestone.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::plan::{FilePlan, Milestone, PlannerResult};
use crate::core::report::{FileCompletionReport, FileStatus};
use crate::core::usage::SessionTracker;
use crate::io::agent::{AgentRequest, GenerationAgent, execute_recorded};
use crate::io::config::ForgeConfig;
use crate::io::paths::ForgePaths;
use crate::io::prompt::{BuildPassInputs, CompletionPassInputs, PromptBuilder, PromptPack};
use crate::io::verify::{PathResolver, verify_files};
use crate::provider::{PromptContribution, ProviderRegistry, load_provider_config};
use std::time::Duration;

/// Shared, read-only surroundings for loop passes.
pub struct LoopContext<'a> {
    pub paths: &'a ForgePaths,
    pub app_name: &'a str,
    pub config: &'a ForgeConfig,
    pub prompts: &'a PromptBuilder,
    pub registry: &'a ProviderRegistry,
    pub resolver: &'a dyn PathResolver,
}

/// Outcome of one milestone's loop.
#[derive(Debug, Clone)]
pub struct MilestoneOutcome {
    pub milestone: Milestone,
    /// Agent calls made; 0 for a zero-file milestone.
    pub passes_used: u32,
    pub complete: bool,
    /// Last verifier report; `None` for a zero-file milestone.
    pub report: Option<FileCompletionReport>,
}

/// Run one milestone to completion or retry-budget exhaustion.
#[instrument(skip_all, fields(milestone = milestone.as_str()))]
pub fn run_milestone<A: GenerationAgent>(
    agent: &A,
    plan: &PlannerResult,
    milestone: Milestone,
    ctx: &LoopContext<'_>,
    tracker: &mut SessionTracker,
) -> Result<MilestoneOutcome> {
    let files = plan.files_for(milestone);
    if files.is_empty() {
        debug!("zero-file milestone, skipping");
        return Ok(MilestoneOutcome {
            milestone,
            passes_used: 0,
            complete: true,
            report: None,
        });
    }

    let contributions = prompt_contributions(plan, ctx)?;
    let allowed_tools = allowed_tools(plan, ctx)?;
    let max_passes = ctx.config.max_passes_per_milestone;

    let mut last_report: Option<FileCompletionReport> = None;
    for pass in 1..=max_passes {
        let pack = match &last_report {
            None => ctx.prompts.build_pass(&BuildPassInputs {
                milestone: milestone.as_str(),
                files: &files,
                data_shapes: pretty_section(&plan.data_shapes),
                design_tokens: pretty_section(&plan.design_tokens),
                permissions: &plan.permissions,
                platforms: &plan.platforms,
                contributions: &contributions,
            })?,
            Some(report) => ctx.prompts.completion_pass(&CompletionPassInputs {
                scope: &format!("milestone {}", milestone.as_str()),
                unresolved: unresolved_pairs(&files, report),
                contributions: &contributions,
            })?,
        };

        info!(pass, planned = files.len(), "issuing agent pass");
        let response = run_pass(
            agent,
            ctx,
            pack,
            &allowed_tools,
            milestone.as_str(),
            pass,
            tracker,
        )?;
        if response.is_error {
            return Err(anyhow!("agent reported failure: {}", response.text));
        }

        let report = verify_files(&ctx.paths.root, ctx.app_name, &files, ctx.resolver);
        if report.complete {
            info!(pass, "milestone complete");
            return Ok(MilestoneOutcome {
                milestone,
                passes_used: pass,
                complete: true,
                report: Some(report),
            });
        }
        debug!(
            pass,
            missing = report.missing.len(),
            invalid = report.invalid.len(),
            "pass left files unresolved"
        );
        last_report = Some(report);
    }

    info!(max_passes, "retry budget exhausted, deferring to final sweep");
    Ok(MilestoneOutcome {
        milestone,
        passes_used: max_passes,
        complete: false,
        report: last_report,
    })
}

/// Issue one recorded agent pass and account for it.
pub(crate) fn run_pass<A: GenerationAgent>(
    agent: &A,
    ctx: &LoopContext<'_>,
    pack: PromptPack,
    allowed_tools: &[String],
    phase: &str,
    pass: u32,
    tracker: &mut SessionTracker,
) -> Result<crate::io::agent::AgentResponse> {
    let request = AgentRequest {
        workdir: ctx.paths.root.clone(),
        system_prompt: pack.system,
        user_message: pack.user,
        image_paths: Vec::new(),
        session: tracker.session().map(str::to_string),
        allowed_tools: allowed_tools.to_vec(),
        timeout: Duration::from_secs(ctx.config.agent_timeout_secs),
        output_limit_bytes: ctx.config.agent_output_limit_bytes,
    };
    let response = execute_recorded(agent, &request, &ctx.paths.pass_dir(phase, pass))
        .with_context(|| format!("{phase} pass {pass}"))?;
    // Usage and session are recorded regardless of what the pass achieved.
    tracker.record(&response.usage, response.session.as_deref());
    Ok(response)
}

/// Collect prompt contributions from active providers that implement the
/// prompt capability; the rest are skipped without error.
pub(crate) fn prompt_contributions(
    plan: &PlannerResult,
    ctx: &LoopContext<'_>,
) -> Result<Vec<PromptContribution>> {
    let mut contributions = Vec::new();
    for provider in ctx.registry.active(&plan.integrations) {
        let Some(capability) = provider.prompt() else {
            continue;
        };
        let config = load_provider_config(&ctx.paths.provider_config_path(provider.id()))?;
        if let Some(contribution) = capability.contribute(&plan.data_shapes, &config) {
            contributions.push(contribution);
        }
    }
    Ok(contributions)
}

/// Base tool allowlist plus tools declared by active providers.
pub(crate) fn allowed_tools(plan: &PlannerResult, ctx: &LoopContext<'_>) -> Result<Vec<String>> {
    let mut tools = ctx.config.base_allowed_tools.clone();
    for provider in ctx.registry.active(&plan.integrations) {
        let Some(capability) = provider.tools() else {
            continue;
        };
        let config = load_provider_config(&ctx.paths.provider_config_path(provider.id()))?;
        for tool in capability.tools(&config) {
            if !tools.contains(&tool.name) {
                tools.push(tool.name);
            }
        }
    }
    Ok(tools)
}

/// Pair each unresolved status with its plan entry.
pub(crate) fn unresolved_pairs<'a>(
    files: &[&'a FilePlan],
    report: &'a FileCompletionReport,
) -> Vec<(&'a FilePlan, &'a FileStatus)> {
    report
        .unresolved()
        .filter_map(|status| {
            files
                .iter()
                .find(|file| file.path == status.path)
                .map(|file| (*file, status))
        })
        .collect()
}

fn pretty_section(value: &serde_json::Value) -> String {
    if value.is_null() {
        return String::new();
    }
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::Milestone;
    use crate::io::config::ForgeConfig;
    use crate::io::prompt::PromptBuilder;
    use crate::io::verify::SourceRootResolver;
    use crate::test_support::{
        FailingAgent, ScriptedAgent, ScriptedStep, file_plan, plan_with, response, step,
    };
    use std::fs;

    struct Fixture {
        _temp: tempfile::TempDir,
        paths: ForgePaths,
        config: ForgeConfig,
        prompts: PromptBuilder,
        registry: ProviderRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let paths = ForgePaths::new(temp.path());
            paths.ensure_layout().expect("layout");
            Self {
                _temp: temp,
                paths,
                config: ForgeConfig::default(),
                prompts: PromptBuilder::new(60_000),
                registry: ProviderRegistry::new(),
            }
        }

        fn ctx(&self) -> LoopContext<'_> {
            LoopContext {
                paths: &self.paths,
                app_name: "Notes",
                config: &self.config,
                prompts: &self.prompts,
                registry: &self.registry,
                resolver: &SourceRootResolver,
            }
        }
    }

    fn two_file_plan() -> PlannerResult {
        plan_with(
            vec![
                file_plan("Models/Note.swift", "Note", Milestone::Foundation),
                file_plan("App/NotesApp.swift", "NotesApp", Milestone::Foundation),
            ],
            vec!["Models/Note.swift".to_string(), "App/NotesApp.swift".to_string()],
        )
    }

    #[test]
    fn zero_file_milestone_skips_without_agent_call() {
        let fixture = Fixture::new();
        let plan = two_file_plan();
        let agent = ScriptedAgent::new(Vec::new());
        let mut tracker = SessionTracker::new();

        let outcome = run_milestone(&agent, &plan, Milestone::Auth, &fixture.ctx(), &mut tracker)
            .expect("milestone");

        assert_eq!(agent.calls(), 0);
        assert_eq!(outcome.passes_used, 0);
        assert!(outcome.complete);
        assert!(outcome.report.is_none());
    }

    #[test]
    fn loop_never_exceeds_max_passes() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 3;
        let plan = two_file_plan();
        // Agent never writes anything, so every pass stays incomplete.
        let agent = ScriptedAgent::new(vec![
            step(response("pass 1"), &[]),
            step(response("pass 2"), &[]),
            step(response("pass 3"), &[]),
        ]);
        let mut tracker = SessionTracker::new();

        let outcome = run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .expect("milestone");

        assert_eq!(agent.calls(), 3);
        assert_eq!(outcome.passes_used, 3);
        assert!(!outcome.complete);
        let report = outcome.report.expect("report");
        assert_eq!(report.missing.len(), 2);
        assert_eq!(tracker.totals().passes, 3);
    }

    #[test]
    fn third_pass_resolving_last_file_completes_with_three_calls() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 3;
        let plan = two_file_plan();
        let agent = ScriptedAgent::new(vec![
            step(
                response("wrote Note"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(response("forgot again"), &[]),
            step(
                response("wrote NotesApp"),
                &[("Notes/App/NotesApp.swift", "struct NotesApp {}\n")],
            ),
        ]);
        let mut tracker = SessionTracker::new();

        let outcome = run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .expect("milestone");

        assert_eq!(agent.calls(), 3);
        assert_eq!(outcome.passes_used, 3);
        assert!(outcome.complete);
        assert!(outcome.report.expect("report").complete);
    }

    #[test]
    fn completion_pass_prompt_names_only_unresolved_files() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 2;
        let plan = two_file_plan();
        let agent = ScriptedAgent::new(vec![
            step(
                response("wrote Note"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("wrote NotesApp"),
                &[("Notes/App/NotesApp.swift", "struct NotesApp {}\n")],
            ),
        ]);
        let mut tracker = SessionTracker::new();

        run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .expect("milestone");

        let prompt = fs::read_to_string(fixture.paths.pass_dir("foundation", 2).join("prompt.md"))
            .expect("pass 2 prompt");
        assert!(prompt.contains("App/NotesApp.swift"));
        // The already-valid file is not re-requested.
        let completion_body = prompt
            .split("=== user ===")
            .nth(1)
            .expect("user section");
        assert!(!completion_body.contains("Models/Note.swift"));
    }

    #[test]
    fn agent_reported_failure_is_fatal() {
        let fixture = Fixture::new();
        let plan = two_file_plan();
        let mut failed = response("backend exploded");
        failed.is_error = true;
        let agent = ScriptedAgent::new(vec![ScriptedStep {
            response: failed,
            writes: Vec::new(),
        }]);
        let mut tracker = SessionTracker::new();

        let err = run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .unwrap_err();
        assert!(err.to_string().contains("agent reported failure"));
        // Usage is still recorded for the failed pass.
        assert_eq!(tracker.totals().passes, 1);
    }

    #[test]
    fn transport_failure_aborts_after_one_call() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 3;
        let plan = two_file_plan();
        let agent = FailingAgent::new();
        let mut tracker = SessionTracker::new();

        let err = run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .unwrap_err();

        // No retry against the budget: the first failed call is fatal.
        assert_eq!(agent.calls(), 1);
        assert!(format!("{err:#}").contains("agent transport failure"));
        assert_eq!(tracker.totals().passes, 0);
    }

    struct CancellingAgent {
        calls: std::cell::Cell<u32>,
    }

    impl CancellingAgent {
        fn calls(&self) -> u32 {
            self.calls.get()
        }
    }

    impl GenerationAgent for CancellingAgent {
        fn generate(&self, _request: &AgentRequest) -> anyhow::Result<crate::io::agent::AgentResponse> {
            self.calls.set(self.calls.get() + 1);
            Err(anyhow::Error::new(crate::core::cancel::CancelledError))
        }
    }

    #[test]
    fn cancellation_is_fatal_and_distinguishable() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 3;
        let plan = two_file_plan();
        let agent = CancellingAgent {
            calls: std::cell::Cell::new(0),
        };
        let mut tracker = SessionTracker::new();

        let err = run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .unwrap_err();

        // Not reinterpreted as an incomplete pass: the typed condition
        // survives the error chain and the loop stops immediately.
        assert!(err.downcast_ref::<crate::core::cancel::CancelledError>().is_some());
        assert_eq!(agent.calls(), 1);
        assert_eq!(tracker.totals().passes, 0);
    }

    #[test]
    fn session_token_is_carried_between_passes() {
        let mut fixture = Fixture::new();
        fixture.config.max_passes_per_milestone = 2;
        let plan = two_file_plan();
        let agent = ScriptedAgent::new(vec![
            step(response("pass 1"), &[]),
            step(response("pass 2"), &[]),
        ]);
        let mut tracker = SessionTracker::new();

        run_milestone(
            &agent,
            &plan,
            Milestone::Foundation,
            &fixture.ctx(),
            &mut tracker,
        )
        .expect("milestone");

        assert_eq!(tracker.session(), Some("sess-test"));
    }
}
