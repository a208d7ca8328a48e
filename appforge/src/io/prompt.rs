//! Prompt assembly for every agent-facing phase.
//!
//! Templates are compiled once from embedded markdown; provider prompt
//! contributions are appended without the assembly step knowing provider
//! identities. Oversized user bodies are truncated to the byte budget.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::plan::FilePlan;
use crate::core::report::FileStatus;
use crate::provider::PromptContribution;

const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const BUILD_TEMPLATE: &str = include_str!("prompts/build.md");
const COMPLETION_TEMPLATE: &str = include_str!("prompts/completion.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

const ANALYZE_SYSTEM: &str = "You are a senior product engineer analyzing a \
product request before any code is written. Be concrete and brief.";
const PLAN_SYSTEM: &str = "You are a software architect producing a \
machine-readable build plan. Reply with exactly one JSON object.";
const BUILD_SYSTEM: &str = "You are an expert app engineer working inside \
the project directory. Read the existing project before writing. Create \
complete, compiling files; never leave placeholders.";
const FIX_SYSTEM: &str = "You are an expert app engineer repairing a build \
failure. Change only what the diagnostics require.";

/// Assembled instructions for one agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    pub system: String,
    pub user: String,
}

/// Planned-file context for template rendering.
#[derive(Debug, Clone, Serialize)]
struct PlannedFileContext {
    path: String,
    type_name: String,
    purpose: String,
    components: String,
    data_access: String,
    depends_on: Vec<String>,
}

impl PlannedFileContext {
    fn from_plan(plan: &FilePlan) -> Self {
        Self {
            path: plan.path.clone(),
            type_name: plan.type_name.clone(),
            purpose: plan.purpose.clone(),
            components: plan.components.clone(),
            data_access: plan.data_access.clone(),
            depends_on: plan.depends_on.clone(),
        }
    }
}

/// Unresolved-file context for completion passes.
#[derive(Debug, Clone, Serialize)]
struct UnresolvedFileContext {
    path: String,
    type_name: String,
    reason: String,
}

/// Inputs for a milestone's first (full build) pass.
#[derive(Debug, Clone)]
pub struct BuildPassInputs<'a> {
    /// Milestone label, e.g. `foundation`.
    pub milestone: &'a str,
    pub files: &'a [&'a FilePlan],
    /// Pretty-printed data shapes; empty when the plan has none.
    pub data_shapes: String,
    /// Pretty-printed design tokens; empty when the plan has none.
    pub design_tokens: String,
    pub permissions: &'a [String],
    pub platforms: &'a [String],
    pub contributions: &'a [PromptContribution],
}

/// Inputs for a targeted completion pass (milestone or final sweep).
#[derive(Debug, Clone)]
pub struct CompletionPassInputs<'a> {
    /// Scope label, e.g. `milestone foundation` or `final sweep`.
    pub scope: &'a str,
    /// (plan, failing status) pairs for every unresolved file.
    pub unresolved: Vec<(&'a FilePlan, &'a FileStatus)>,
    pub contributions: &'a [PromptContribution],
}

/// Builds prompt packs within a byte budget.
pub struct PromptBuilder {
    budget_bytes: usize,
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("analyze", ANALYZE_TEMPLATE)
            .expect("analyze template should be valid");
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("build", BUILD_TEMPLATE)
            .expect("build template should be valid");
        env.add_template("completion", COMPLETION_TEMPLATE)
            .expect("completion template should be valid");
        env.add_template("fix", FIX_TEMPLATE)
            .expect("fix template should be valid");
        Self { budget_bytes, env }
    }

    pub fn analyze(&self, description: &str) -> Result<PromptPack> {
        let user = self.render("analyze", context! { description })?;
        Ok(self.pack(ANALYZE_SYSTEM.to_string(), user))
    }

    pub fn plan(&self, description: &str, analysis: &str, providers: &[&str]) -> Result<PromptPack> {
        let user = self.render("plan", context! { description, analysis, providers })?;
        Ok(self.pack(PLAN_SYSTEM.to_string(), user))
    }

    pub fn build_pass(&self, input: &BuildPassInputs<'_>) -> Result<PromptPack> {
        let files: Vec<PlannedFileContext> = input
            .files
            .iter()
            .map(|f| PlannedFileContext::from_plan(f))
            .collect();
        let addenda = user_addenda(input.contributions);
        let user = self.render(
            "build",
            context! {
                milestone => input.milestone,
                files,
                data_shapes => input.data_shapes,
                design_tokens => input.design_tokens,
                permissions => input.permissions,
                platforms => input.platforms,
                addenda,
            },
        )?;
        Ok(self.pack(with_contributions(BUILD_SYSTEM, input.contributions), user))
    }

    pub fn completion_pass(&self, input: &CompletionPassInputs<'_>) -> Result<PromptPack> {
        let unresolved: Vec<UnresolvedFileContext> = input
            .unresolved
            .iter()
            .map(|(plan, status)| UnresolvedFileContext {
                path: plan.path.clone(),
                type_name: plan.type_name.clone(),
                reason: status
                    .reason
                    .clone()
                    .unwrap_or_else(|| "missing or invalid".to_string()),
            })
            .collect();
        let addenda = user_addenda(input.contributions);
        let user = self.render(
            "completion",
            context! { scope => input.scope, unresolved, addenda },
        )?;
        Ok(self.pack(with_contributions(BUILD_SYSTEM, input.contributions), user))
    }

    pub fn fix_pass(&self, target: &str, diagnostics: &str) -> Result<PromptPack> {
        let user = self.render("fix", context! { target, diagnostics })?;
        Ok(self.pack(FIX_SYSTEM.to_string(), user))
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("load template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render template {name}"))
    }

    fn pack(&self, system: String, user: String) -> PromptPack {
        PromptPack {
            system,
            user: truncate_to_budget(user, self.budget_bytes),
        }
    }
}

fn with_contributions(base: &str, contributions: &[PromptContribution]) -> String {
    let mut system = base.to_string();
    for contribution in contributions {
        if contribution.system_text.is_empty() {
            continue;
        }
        system.push_str("\n\n");
        system.push_str(&contribution.system_text);
    }
    system
}

fn user_addenda(contributions: &[PromptContribution]) -> Vec<String> {
    contributions
        .iter()
        .filter_map(|c| c.user_addendum.clone())
        .collect()
}

/// Cut the body at the budget on a char boundary, marking the cut.
fn truncate_to_budget(body: String, budget: usize) -> String {
    if body.len() <= budget {
        return body;
    }
    let mut cut = budget.saturating_sub(12);
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    debug!(before_len = body.len(), after_len = cut, "truncated prompt for budget");
    let mut truncated = body[..cut].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}
