//! Phase sequencer: Analyze, Plan, Build per milestone, FinalSweep, Fix, Run.
//!
//! Phases run strictly in order and each consumes its predecessor's output.
//! Failure severity is graded: transport failures and cancellation abort the
//! run; an exhausted milestone defers to the final sweep; an unconfirmed
//! compile and launch failures degrade the result instead of erroring.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::plan::PlannerResult;
use crate::core::report::FileCompletionReport;
use crate::core::usage::{SessionTracker, UsageTotals};
use crate::fix::{CompileStatus, run_fix_loop};
use crate::io::agent::{AgentRequest, GenerationAgent, execute_recorded};
use crate::io::compiler::{BuildRunner, Launcher};
use crate::io::config::load_config;
use crate::io::paths::ForgePaths;
use crate::io::plan_store::{parse_planner_output, write_plan};
use crate::io::prompt::{CompletionPassInputs, PromptBuilder};
use crate::io::verify::{PathResolver, verify_files};
use crate::milestone::{
    LoopContext, MilestoneOutcome, allowed_tools, prompt_contributions, run_milestone, run_pass,
    unresolved_pairs,
};
use crate::provider::ProviderRegistry;

/// One full build request.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// The product description driving analysis and planning.
    pub description: String,
    pub app_name: String,
    pub project_root: PathBuf,
    /// Reference images, consulted during analysis only.
    pub image_paths: Vec<PathBuf>,
    /// Build target; defaults to the app name.
    pub target: Option<String>,
}

/// External collaborators, injected so tests can script them.
pub struct PipelineDeps<'a, A: GenerationAgent, B: BuildRunner> {
    pub agent: &'a A,
    pub builder: &'a B,
    pub registry: &'a ProviderRegistry,
    pub resolver: &'a dyn PathResolver,
    pub launcher: Option<&'a dyn Launcher>,
}

/// Everything a caller needs to report the run.
#[derive(Debug, Clone)]
pub struct BuildRunResult {
    pub project_root: PathBuf,
    pub milestones: Vec<MilestoneOutcome>,
    /// Verification of the entire plan after the final sweep.
    pub final_report: FileCompletionReport,
    /// Declared paths still missing or invalid at the end.
    pub unresolved: Vec<String>,
    pub compile: CompileStatus,
    /// Resources created during provisioning.
    pub provisioned: Vec<String>,
    /// Non-fatal degradations accumulated across phases.
    pub warnings: Vec<String>,
    pub totals: UsageTotals,
}

/// Run the whole pipeline for one request.
#[instrument(skip_all, fields(app = %request.app_name))]
pub fn run_pipeline<A: GenerationAgent, B: BuildRunner>(
    request: &PipelineRequest,
    deps: &PipelineDeps<'_, A, B>,
) -> Result<BuildRunResult> {
    let paths = ForgePaths::new(&request.project_root);
    paths.ensure_layout()?;
    let config = load_config(&paths.config_path)?;
    let prompts = PromptBuilder::new(config.prompt_budget_bytes);
    let mut tracker = SessionTracker::new();
    let mut warnings = Vec::new();

    let ctx = LoopContext {
        paths: &paths,
        app_name: &request.app_name,
        config: &config,
        prompts: &prompts,
        registry: deps.registry,
        resolver: deps.resolver,
    };

    // Analyze. Reference images are consulted here and nowhere else.
    info!("phase: analyze");
    let analysis = run_analyze(deps.agent, request, &ctx, &mut tracker)?;

    // Plan.
    info!("phase: plan");
    let plan = run_plan(deps.agent, request, &analysis, &ctx, &mut tracker)?;
    write_plan(&paths.plan_path, &plan)?;

    // Provision declared integrations before any code is generated.
    let provisioned = provision_integrations(&plan, deps.registry, &mut warnings);

    // Build, one milestone at a time in canonical order.
    let mut milestones = Vec::new();
    for milestone in plan.milestones_present() {
        if config.fresh_session_per_milestone {
            tracker.reset_session();
        }
        info!(milestone = milestone.as_str(), "phase: build");
        let outcome = run_milestone(deps.agent, &plan, milestone, &ctx, &mut tracker)?;
        if !outcome.complete {
            warn!(
                milestone = milestone.as_str(),
                "milestone left unresolved files for the final sweep"
            );
        }
        milestones.push(outcome);
    }

    // Final sweep over the whole plan.
    info!("phase: final sweep");
    let final_report = run_final_sweep(deps.agent, &plan, &ctx, &mut tracker)?;
    if !final_report.complete {
        warnings.push(format!(
            "{} planned file(s) unresolved after final sweep",
            final_report.unresolved().count()
        ));
    }

    // Fix until the build is confirmed or the repair budget runs out.
    info!("phase: fix");
    let target = request.target.clone().unwrap_or_else(|| request.app_name.clone());
    let compile = run_fix_loop(deps.agent, deps.builder, &target, &ctx, &mut tracker)?;

    // Run. A launch failure degrades the result; the build already happened.
    if compile.confirmed()
        && let Some(launcher) = deps.launcher
    {
        info!("phase: run");
        if let Err(err) = launcher.launch(&request.project_root, &target) {
            warn!(err = %err, "launch failed");
            warnings.push(format!("launch failed: {err:#}"));
        }
    }

    Ok(BuildRunResult {
        project_root: request.project_root.clone(),
        unresolved: final_report.unresolved_paths(),
        milestones,
        final_report,
        compile,
        provisioned,
        warnings,
        totals: *tracker.totals(),
    })
}

fn run_analyze<A: GenerationAgent>(
    agent: &A,
    request: &PipelineRequest,
    ctx: &LoopContext<'_>,
    tracker: &mut SessionTracker,
) -> Result<String> {
    let pack = ctx.prompts.analyze(&request.description)?;
    let agent_request = AgentRequest {
        workdir: ctx.paths.root.clone(),
        system_prompt: pack.system,
        user_message: pack.user,
        image_paths: request.image_paths.clone(),
        session: None,
        allowed_tools: ctx.config.base_allowed_tools.clone(),
        timeout: Duration::from_secs(ctx.config.agent_timeout_secs),
        output_limit_bytes: ctx.config.agent_output_limit_bytes,
    };
    let response = execute_recorded(agent, &agent_request, &ctx.paths.pass_dir("analyze", 1))
        .context("analyze pass")?;
    tracker.record(&response.usage, response.session.as_deref());
    if response.is_error {
        return Err(anyhow::anyhow!("analysis failed: {}", response.text));
    }
    Ok(response.text)
}

fn run_plan<A: GenerationAgent>(
    agent: &A,
    request: &PipelineRequest,
    analysis: &str,
    ctx: &LoopContext<'_>,
    tracker: &mut SessionTracker,
) -> Result<PlannerResult> {
    let provider_ids: Vec<&str> = ctx.registry.iter().map(|p| p.id()).collect();
    let pack = ctx
        .prompts
        .plan(&request.description, analysis, &provider_ids)?;
    let tools = ctx.config.base_allowed_tools.clone();
    let response = run_pass(agent, ctx, pack, &tools, "plan", 1, tracker)?;
    if response.is_error {
        return Err(anyhow::anyhow!("planning failed: {}", response.text));
    }
    parse_planner_output(&response.text)
}

fn provision_integrations(
    plan: &PlannerResult,
    registry: &ProviderRegistry,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut provisioned = Vec::new();
    for provider in registry.active(&plan.integrations) {
        let Some(capability) = provider.provisioning() else {
            continue;
        };
        info!(provider = provider.id(), "provisioning");
        match capability.provision(&plan.data_shapes, &plan.features) {
            Ok(outcome) => {
                provisioned.extend(outcome.created);
                warnings.extend(outcome.warnings);
            }
            Err(err) => {
                warn!(provider = provider.id(), err = %err, "provisioning failed");
                warnings.push(format!("provisioning {} failed: {err:#}", provider.id()));
            }
        }
    }
    provisioned
}

/// Verify every planned file; issue at most one catch-all completion pass
/// over whatever the milestone loops left behind, then re-verify.
fn run_final_sweep<A: GenerationAgent>(
    agent: &A,
    plan: &PlannerResult,
    ctx: &LoopContext<'_>,
    tracker: &mut SessionTracker,
) -> Result<FileCompletionReport> {
    let ordered = plan.ordered_files();
    let report = verify_files(&ctx.paths.root, ctx.app_name, &ordered, ctx.resolver);
    if report.complete {
        return Ok(report);
    }

    let contributions = prompt_contributions(plan, ctx)?;
    let pack = ctx.prompts.completion_pass(&CompletionPassInputs {
        scope: "final sweep",
        unresolved: unresolved_pairs(&ordered, &report),
        contributions: &contributions,
    })?;
    let tools = allowed_tools(plan, ctx)?;
    let response = run_pass(agent, ctx, pack, &tools, "sweep", 1, tracker)?;
    if response.is_error {
        return Err(anyhow::anyhow!("final sweep failed: {}", response.text));
    }

    Ok(verify_files(&ctx.paths.root, ctx.app_name, &ordered, ctx.resolver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::Milestone;
    use crate::io::config::{ForgeConfig, write_config};
    use crate::io::verify::SourceRootResolver;
    use crate::provider::{Provider, ProvisionOutcome, ProvisioningCapability};
    use crate::test_support::{ScriptedAgent, ScriptedBuildRunner, response, step};
    use anyhow::anyhow;
    use serde_json::Value;
    use std::path::Path;

    const PLAN_JSON: &str = r#"{
        "files": [
            {"path": "Models/Note.swift", "type_name": "Note", "milestone": "foundation"},
            {"path": "Views/NoteList.swift", "type_name": "NoteListView", "milestone": "features"}
        ],
        "build_order": ["Models/Note.swift", "Views/NoteList.swift"],
        "integrations": []
    }"#;

    fn request(root: &Path) -> PipelineRequest {
        PipelineRequest {
            description: "a notes app".to_string(),
            app_name: "Notes".to_string(),
            project_root: root.to_path_buf(),
            image_paths: Vec::new(),
            target: None,
        }
    }

    #[test]
    fn happy_path_runs_every_phase_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ScriptedAgent::new(vec![
            step(response("analysis: a simple notes app"), &[]),
            step(response(PLAN_JSON), &[]),
            step(
                response("built foundation"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("built features"),
                &[("Notes/Views/NoteList.swift", "struct NoteListView {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let registry = ProviderRegistry::new();
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        assert_eq!(agent.calls(), 4);
        assert_eq!(result.milestones.len(), 2);
        assert!(result.milestones.iter().all(|m| m.complete));
        assert!(result.final_report.complete);
        assert!(result.unresolved.is_empty());
        assert_eq!(result.compile, CompileStatus::Succeeded { attempts: 1 });
        assert!(result.warnings.is_empty());
        assert_eq!(result.totals.passes, 4);
        // The plan was persisted for later verify invocations.
        assert!(temp.path().join(".appforge/plan.json").exists());
    }

    #[test]
    fn final_sweep_catches_a_milestone_shortfall() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ForgePaths::new(temp.path());
        paths.ensure_layout().expect("layout");
        let config = ForgeConfig {
            max_passes_per_milestone: 1,
            ..ForgeConfig::default()
        };
        write_config(&paths.config_path, &config).expect("config");

        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response(PLAN_JSON), &[]),
            // Foundation's single pass writes nothing.
            step(response("got distracted"), &[]),
            step(
                response("built features"),
                &[("Notes/Views/NoteList.swift", "struct NoteListView {}\n")],
            ),
            // The sweep pass writes the straggler.
            step(
                response("completed Note"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let registry = ProviderRegistry::new();
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        assert_eq!(agent.calls(), 5);
        assert!(!result.milestones[0].complete);
        assert!(result.milestones[1].complete);
        assert!(result.final_report.complete);
        assert!(result.unresolved.is_empty());
    }

    struct FlakyProvider;

    impl Provider for FlakyProvider {
        fn id(&self) -> &str {
            "flaky"
        }
        fn display_name(&self) -> &str {
            "Flaky"
        }
        fn provisioning(&self) -> Option<&dyn ProvisioningCapability> {
            Some(self)
        }
    }

    impl ProvisioningCapability for FlakyProvider {
        fn provision(&self, _shapes: &Value, _features: &[String]) -> Result<ProvisionOutcome> {
            Err(anyhow!("backend unreachable"))
        }
    }

    #[test]
    fn provisioning_failure_is_a_warning_not_an_abort() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan_json = PLAN_JSON.replace("\"integrations\": []", "\"integrations\": [\"flaky\"]");
        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response(&plan_json), &[]),
            step(
                response("built foundation"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("built features"),
                &[("Notes/Views/NoteList.swift", "struct NoteListView {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(FlakyProvider)).expect("register");
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        assert!(result.final_report.complete);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("backend unreachable"));
    }

    struct EchoProvider;

    impl Provider for EchoProvider {
        fn id(&self) -> &str {
            "echo"
        }
        fn display_name(&self) -> &str {
            "Echo"
        }
        fn provisioning(&self) -> Option<&dyn ProvisioningCapability> {
            Some(self)
        }
    }

    impl ProvisioningCapability for EchoProvider {
        fn provision(&self, _shapes: &Value, features: &[String]) -> Result<ProvisionOutcome> {
            Ok(ProvisionOutcome {
                created: features.iter().map(|f| format!("feature {f}")).collect(),
                warnings: Vec::new(),
            })
        }
    }

    #[test]
    fn provisioning_receives_feature_flags_not_permissions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan_json = PLAN_JSON.replace(
            "\"integrations\": []",
            r#""integrations": ["echo"],
            "features": ["realtime"],
            "permissions": ["camera"]"#,
        );
        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response(&plan_json), &[]),
            step(
                response("built foundation"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("built features"),
                &[("Notes/Views/NoteList.swift", "struct NoteListView {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(EchoProvider)).expect("register");
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        assert_eq!(result.provisioned, vec!["feature realtime".to_string()]);
    }

    struct FailingLauncher;

    impl Launcher for FailingLauncher {
        fn launch(&self, _project_dir: &Path, _target: &str) -> Result<()> {
            Err(anyhow!("no simulator available"))
        }
    }

    #[test]
    fn launch_failure_degrades_instead_of_erroring() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response(PLAN_JSON), &[]),
            step(
                response("built foundation"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("built features"),
                &[("Notes/Views/NoteList.swift", "struct NoteListView {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let registry = ProviderRegistry::new();
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: Some(&FailingLauncher),
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        assert_eq!(result.compile, CompileStatus::Succeeded { attempts: 1 });
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("launch failed"));
    }

    #[test]
    fn unparseable_plan_aborts_the_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response("I refuse to emit JSON"), &[]),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let registry = ProviderRegistry::new();
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let err = run_pipeline(&request(temp.path()), &deps).unwrap_err();
        assert!(format!("{err:#}").contains("parse planner output"));
    }

    #[test]
    fn milestone_outcomes_follow_canonical_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan_json = r#"{
            "files": [
                {"path": "Polish/Theme.swift", "type_name": "Theme", "milestone": "polish"},
                {"path": "Models/Note.swift", "type_name": "Note", "milestone": "foundation"}
            ],
            "build_order": ["Models/Note.swift", "Polish/Theme.swift"],
            "integrations": []
        }"#;
        let agent = ScriptedAgent::new(vec![
            step(response("analysis"), &[]),
            step(response(plan_json), &[]),
            // Foundation comes first regardless of plan declaration order.
            step(
                response("built foundation"),
                &[("Notes/Models/Note.swift", "struct Note {}\n")],
            ),
            step(
                response("built polish"),
                &[("Notes/Polish/Theme.swift", "struct Theme {}\n")],
            ),
        ]);
        let builder = ScriptedBuildRunner::succeeding();
        let registry = ProviderRegistry::new();
        let deps = PipelineDeps {
            agent: &agent,
            builder: &builder,
            registry: &registry,
            resolver: &SourceRootResolver,
            launcher: None,
        };

        let result = run_pipeline(&request(temp.path()), &deps).expect("pipeline");

        let order: Vec<Milestone> = result.milestones.iter().map(|m| m.milestone).collect();
        assert_eq!(order, vec![Milestone::Foundation, Milestone::Polish]);
    }
}
