//! Well-known locations under the project's `.appforge/` state directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Layout of pipeline-owned files inside one project.
#[derive(Debug, Clone)]
pub struct ForgePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    /// Per-pass prompt/response artifacts: `passes/<phase>/<n>/`.
    pub passes_dir: PathBuf,
    pub providers_dir: PathBuf,
    pub build_log_path: PathBuf,
}

impl ForgePaths {
    pub fn new(root: &Path) -> Self {
        let state_dir = root.join(".appforge");
        Self {
            root: root.to_path_buf(),
            config_path: state_dir.join("config.toml"),
            plan_path: state_dir.join("plan.json"),
            passes_dir: state_dir.join("passes"),
            providers_dir: state_dir.join("providers"),
            build_log_path: state_dir.join("build.log"),
            state_dir,
        }
    }

    /// Create the state directory tree if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.passes_dir, &self.providers_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Artifact directory for one pass of one phase.
    pub fn pass_dir(&self, phase: &str, pass: u32) -> PathBuf {
        self.passes_dir.join(phase).join(pass.to_string())
    }

    /// Stored configuration for one provider.
    pub fn provider_config_path(&self, provider_id: &str) -> PathBuf {
        self.providers_dir.join(format!("{provider_id}.json"))
    }
}
