//! Plan load/save with schema validation, and planner-output parsing.
//!
//! The persisted plan carries the durable fields (per-file path, type name,
//! milestone; global build order; declared integrations) plus the auxiliary
//! prompt sections, validated against a JSON Schema (Draft 2020-12) on load.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::plan::PlannerResult;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Load and validate a persisted plan.
pub fn load_plan(path: &Path) -> Result<PlannerResult> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    plan_from_json(&contents).with_context(|| format!("load plan {}", path.display()))
}

/// Write the plan to disk as pretty JSON with a trailing newline.
pub fn write_plan(path: &Path, plan: &PlannerResult) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write plan {}", path.display()))
}

/// Parse the Planning phase's agent response into a plan.
///
/// The agent is instructed to reply with a single JSON object; a fenced
/// ```json block around it is tolerated.
pub fn parse_planner_output(text: &str) -> Result<PlannerResult> {
    plan_from_json(strip_code_fence(text)).context("parse planner output")
}

fn plan_from_json(raw: &str) -> Result<PlannerResult> {
    let value: Value = serde_json::from_str(raw.trim()).context("parse plan json")?;
    validate_schema(&value)?;
    let plan: PlannerResult = serde_json::from_value(value).context("deserialize plan")?;
    ensure_unique_paths(&plan)?;
    Ok(plan)
}

fn validate_schema(plan: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid plan schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(plan)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "plan schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Every FilePlan path is the plan's unique key.
fn ensure_unique_paths(plan: &PlannerResult) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for file in &plan.files {
        if !seen.insert(file.path.as_str()) {
            return Err(anyhow!("duplicate planned path {}", file.path));
        }
    }
    Ok(())
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end_matches('`').trim()
}
