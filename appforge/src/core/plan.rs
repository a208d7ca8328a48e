//! Declarative build plan: the files a finished project must contain.
//!
//! A [`PlannerResult`] is produced once by the Planning phase and read-only
//! for the rest of the run. The two queries the build loop depends on are
//! [`PlannerResult::milestones_present`] and [`PlannerResult::files_for`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named phase of the build. Plans may skip milestones but never reorder
/// them; the variant order here is the canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Milestone {
    Foundation,
    Features,
    Auth,
    Data,
    Polish,
}

impl Milestone {
    /// All milestones in canonical build order.
    pub const CANONICAL: [Milestone; 5] = [
        Milestone::Foundation,
        Milestone::Features,
        Milestone::Auth,
        Milestone::Data,
        Milestone::Polish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Milestone::Foundation => "foundation",
            Milestone::Features => "features",
            Milestone::Auth => "auth",
            Milestone::Data => "data",
            Milestone::Polish => "polish",
        }
    }
}

/// One planned output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePlan {
    /// Project-relative path; unique key within the plan.
    pub path: String,
    /// Primary declared type the file must contain.
    pub type_name: String,
    /// What the file is for (free text, prompt guidance only).
    #[serde(default)]
    pub purpose: String,
    /// Components/views the file should define (free text).
    #[serde(default)]
    pub components: String,
    /// Data-access guidance (free text).
    #[serde(default)]
    pub data_access: String,
    /// Paths this file builds on. Informational ordering hint, not a DAG.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub milestone: Milestone,
}

/// The whole plan: planned files, an explicit global build order, and
/// auxiliary sections carried opaquely into prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerResult {
    pub files: Vec<FilePlan>,
    /// Global build order as paths. Files absent from this list retain plan
    /// declaration order, appended after the ordered ones.
    #[serde(default)]
    pub build_order: Vec<String>,
    /// Declared data shapes (entity name -> fields). Opaque to the core.
    #[serde(default)]
    pub data_shapes: Value,
    /// Global design tokens (colors, spacing, typography). Opaque.
    #[serde(default)]
    pub design_tokens: Value,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Feature flags for provider provisioning (e.g. `realtime`). Distinct
    /// from `permissions`, which are platform entitlements for prompts.
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub rule_refs: Vec<String>,
    /// Integration provider ids this plan depends on.
    #[serde(default)]
    pub integrations: Vec<String>,
}

impl PlannerResult {
    /// Milestones that have at least one planned file, in canonical order.
    ///
    /// Always a subsequence of [`Milestone::CANONICAL`] and stable across
    /// calls: the plan is never mutated after creation.
    pub fn milestones_present(&self) -> Vec<Milestone> {
        Milestone::CANONICAL
            .into_iter()
            .filter(|m| self.files.iter().any(|f| f.milestone == *m))
            .collect()
    }

    /// Files belonging to `milestone`, ordered by the global build order.
    ///
    /// Files not listed in `build_order` keep their plan declaration order
    /// and come after all ordered files. An absent milestone yields an empty
    /// list; the build loop treats that as a zero-file milestone to skip.
    pub fn files_for(&self, milestone: Milestone) -> Vec<&FilePlan> {
        self.order_files(self.files.iter().filter(|f| f.milestone == milestone))
    }

    /// Every planned file in global build order (the FinalSweep scope).
    pub fn ordered_files(&self) -> Vec<&FilePlan> {
        self.order_files(self.files.iter())
    }

    fn order_files<'a>(&self, files: impl Iterator<Item = &'a FilePlan>) -> Vec<&'a FilePlan> {
        let mut ordered: Vec<(usize, &FilePlan)> = Vec::new();
        let mut unordered: Vec<&FilePlan> = Vec::new();
        for file in files {
            match self.build_order.iter().position(|p| p == &file.path) {
                Some(idx) => ordered.push((idx, file)),
                None => unordered.push(file),
            }
        }
        ordered.sort_by_key(|(idx, _)| *idx);
        ordered
            .into_iter()
            .map(|(_, file)| file)
            .chain(unordered)
            .collect()
    }
}
