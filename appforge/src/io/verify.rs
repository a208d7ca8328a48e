//! Completion verifier: does the project on disk satisfy the plan?
//!
//! For each planned file the verifier resolves the declared path, checks
//! existence, and runs a lightweight structural check for the expected
//! declared type. It never errors for a missing file — missing is a normal,
//! expected report state that drives the retry loop. False negatives from
//! the structural check are acceptable; the loop is self-correcting.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, instrument};

use crate::core::plan::FilePlan;
use crate::core::report::{FileCompletionReport, FileStatus};

/// Maps a plan-declared path to the on-disk location.
///
/// Pure: same inputs always yield the same path. Supplied by the platform
/// layer so the verifier stays ignorant of per-platform source layouts.
pub trait PathResolver {
    fn resolve(&self, project_root: &Path, app_name: &str, declared: &str) -> PathBuf;
}

/// Default layout: sources live under `<root>/<app_name>/`. Declared paths
/// that already start with the app name are not remapped.
pub struct SourceRootResolver;

impl PathResolver for SourceRootResolver {
    fn resolve(&self, project_root: &Path, app_name: &str, declared: &str) -> PathBuf {
        let declared = declared.trim_start_matches("./");
        if Path::new(declared).starts_with(app_name) {
            project_root.join(declared)
        } else {
            project_root.join(app_name).join(declared)
        }
    }
}

/// Verify `files` against the project on disk.
#[instrument(skip_all, fields(project_root = %project_root.display(), planned = files.len()))]
pub fn verify_files(
    project_root: &Path,
    app_name: &str,
    files: &[&FilePlan],
    resolver: &dyn PathResolver,
) -> FileCompletionReport {
    let statuses = files
        .iter()
        .map(|plan| check_file(project_root, app_name, plan, resolver))
        .collect();
    let report = FileCompletionReport::from_statuses(statuses);
    debug!(
        valid = report.valid_count,
        missing = report.missing.len(),
        invalid = report.invalid.len(),
        complete = report.complete,
        "verified planned files"
    );
    report
}

fn check_file(
    project_root: &Path,
    app_name: &str,
    plan: &FilePlan,
    resolver: &dyn PathResolver,
) -> FileStatus {
    let resolved = resolver.resolve(project_root, app_name, &plan.path);
    if !resolved.is_file() {
        return FileStatus {
            path: plan.path.clone(),
            resolved,
            exists: false,
            type_ok: false,
            reason: Some("file not found".to_string()),
        };
    }
    let contents = match fs::read_to_string(&resolved) {
        Ok(contents) => contents,
        Err(err) => {
            return FileStatus {
                path: plan.path.clone(),
                resolved,
                exists: true,
                type_ok: false,
                reason: Some(format!("unreadable: {err}")),
            };
        }
    };
    match check_declares_type(&contents, &plan.type_name) {
        Ok(()) => FileStatus {
            path: plan.path.clone(),
            resolved,
            exists: true,
            type_ok: true,
            reason: None,
        },
        Err(reason) => FileStatus {
            path: plan.path.clone(),
            resolved,
            exists: true,
            type_ok: false,
            reason: Some(reason),
        },
    }
}

const DECLARATION_KEYWORDS: &str = "struct|class|enum|protocol|actor|typealias|extension";

/// Structural check: the file must declare `type_name` with one of the
/// common type-introduction keywords. Not semantic validation.
fn check_declares_type(contents: &str, type_name: &str) -> Result<(), String> {
    let pattern = format!(
        r"(?m)\b(?:{DECLARATION_KEYWORDS})\s+{}\b",
        regex::escape(type_name)
    );
    let re = Regex::new(&pattern).expect("type declaration pattern should compile");
    if re.is_match(contents) {
        return Ok(());
    }

    let declared = declared_type_names(contents);
    if declared.is_empty() {
        Err(format!("expected declaration of `{type_name}` not found"))
    } else {
        Err(format!(
            "expected declaration of `{type_name}` not found (declares: {})",
            declared.join(", ")
        ))
    }
}

fn declared_type_names(contents: &str) -> Vec<String> {
    use std::sync::LazyLock;
    static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(r"(?m)\b(?:{DECLARATION_KEYWORDS})\s+(\w+)"))
            .expect("declaration scan pattern should compile")
    });
    // Order-preserving dedup: a name can repeat non-adjacently, e.g. a type
    // declaration followed later by an extension of it.
    let mut names: Vec<String> = Vec::new();
    for caps in DECL_RE.captures_iter(contents) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
