//! Test-only scripted fakes and plan fixtures.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::plan::{FilePlan, Milestone, PlannerResult};
use crate::core::usage::PassUsage;
use crate::io::agent::{AgentRequest, AgentResponse, GenerationAgent};
use crate::io::compiler::{BuildOutcome, BuildRequest, BuildRunner};

/// Create a deterministic file plan entry.
pub fn file_plan(path: &str, type_name: &str, milestone: Milestone) -> FilePlan {
    FilePlan {
        path: path.to_string(),
        type_name: type_name.to_string(),
        purpose: format!("{type_name} purpose"),
        components: String::new(),
        data_access: String::new(),
        depends_on: Vec::new(),
        milestone,
    }
}

/// Create a plan with the given files and global build order.
pub fn plan_with(files: Vec<FilePlan>, build_order: Vec<String>) -> PlannerResult {
    PlannerResult {
        files,
        build_order,
        data_shapes: serde_json::Value::Null,
        design_tokens: serde_json::Value::Null,
        permissions: Vec::new(),
        features: Vec::new(),
        platforms: Vec::new(),
        rule_refs: Vec::new(),
        integrations: Vec::new(),
    }
}

/// A successful agent response with deterministic usage.
pub fn response(text: &str) -> AgentResponse {
    AgentResponse {
        text: text.to_string(),
        session: Some("sess-test".to_string()),
        usage: PassUsage {
            input_tokens: 10,
            output_tokens: 20,
            cache_read_tokens: 5,
            cache_write_tokens: 2,
            cost_usd: 0.01,
        },
        is_error: false,
    }
}

/// One scripted agent call: files written into the workdir, then a response.
pub struct ScriptedStep {
    pub response: AgentResponse,
    /// (project-relative path, contents) written before responding.
    pub writes: Vec<(String, String)>,
}

/// Build a scripted step from a response and `(path, contents)` pairs.
pub fn step(response: AgentResponse, writes: &[(&str, &str)]) -> ScriptedStep {
    ScriptedStep {
        response,
        writes: writes
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect(),
    }
}

/// Agent fake that replays scripted steps and counts calls.
pub struct ScriptedAgent {
    steps: RefCell<VecDeque<ScriptedStep>>,
    calls: Cell<u32>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl GenerationAgent for ScriptedAgent {
    fn generate(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted"))?;
        self.calls.set(self.calls.get() + 1);
        for (rel, contents) in &step.writes {
            write_file(&request.workdir, rel, contents)?;
        }
        Ok(step.response)
    }
}

/// Agent fake whose every call is a transport failure.
#[derive(Default)]
pub struct FailingAgent {
    calls: Cell<u32>,
}

impl FailingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl GenerationAgent for FailingAgent {
    fn generate(&self, _request: &AgentRequest) -> Result<AgentResponse> {
        self.calls.set(self.calls.get() + 1);
        Err(anyhow!("agent transport failure"))
    }
}

/// Build runner fake that replays scripted outcomes.
pub struct ScriptedBuildRunner {
    outcomes: RefCell<VecDeque<BuildOutcome>>,
    attempts: Cell<u32>,
}

impl ScriptedBuildRunner {
    pub fn new(outcomes: Vec<BuildOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            attempts: Cell::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![BuildOutcome {
            success: true,
            diagnostics: String::new(),
        }])
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

impl BuildRunner for ScriptedBuildRunner {
    fn attempt_build(&self, _request: &BuildRequest) -> Result<BuildOutcome> {
        self.attempts.set(self.attempts.get() + 1);
        self.outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted build runner exhausted"))
    }
}

fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
