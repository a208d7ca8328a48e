//! Verifier report types.
//!
//! A report is produced fresh on every verification call and never persisted
//! across passes. Missing files are a normal report state, not an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Verification result for one planned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    /// Path as declared in the plan.
    pub path: String,
    /// Path the verifier actually checked on disk.
    pub resolved: PathBuf,
    pub exists: bool,
    /// Whether the expected declared type was found. Always false when the
    /// file is missing.
    pub type_ok: bool,
    /// Human-readable reason when the file is missing or invalid.
    pub reason: Option<String>,
}

impl FileStatus {
    pub fn is_valid(&self) -> bool {
        self.exists && self.type_ok
    }
}

/// Aggregate verifier output over a list of planned files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCompletionReport {
    pub total_planned: usize,
    pub valid_count: usize,
    /// Files not present on disk.
    pub missing: Vec<FileStatus>,
    /// Files present but failing the structural type check.
    pub invalid: Vec<FileStatus>,
    /// `valid_count == total_planned`.
    pub complete: bool,
}

impl FileCompletionReport {
    /// Aggregate per-file statuses. Status order is preserved within the
    /// missing and invalid lists so reports stay deterministic.
    pub fn from_statuses(statuses: Vec<FileStatus>) -> Self {
        let total_planned = statuses.len();
        let mut valid_count = 0;
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        for status in statuses {
            if status.is_valid() {
                valid_count += 1;
            } else if status.exists {
                invalid.push(status);
            } else {
                missing.push(status);
            }
        }
        Self {
            total_planned,
            valid_count,
            missing,
            invalid,
            complete: valid_count == total_planned,
        }
    }

    /// Missing then invalid statuses, the set a completion pass must resolve.
    pub fn unresolved(&self) -> impl Iterator<Item = &FileStatus> {
        self.missing.iter().chain(self.invalid.iter())
    }

    /// Declared paths of all unresolved files.
    pub fn unresolved_paths(&self) -> Vec<String> {
        self.unresolved().map(|s| s.path.clone()).collect()
    }
}
