//! Pipeline configuration stored under `.appforge/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Retry budget per milestone: one full-build pass plus completion passes.
    pub max_passes_per_milestone: u32,

    /// Repair attempts when the compile step fails.
    pub max_fix_attempts: u32,

    /// Reset the agent session token at each milestone boundary.
    pub fresh_session_per_milestone: bool,

    /// Wall-clock budget for one agent call, in seconds.
    pub agent_timeout_secs: u64,

    /// Wall-clock budget for one build attempt, in seconds.
    pub build_timeout_secs: u64,

    /// Truncate captured agent output beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    /// Truncate captured build output beyond this many bytes.
    pub build_output_limit_bytes: usize,

    /// Maximum bytes for an assembled prompt before truncation.
    pub prompt_budget_bytes: usize,

    /// Tools the agent may always use, before provider contributions.
    pub base_allowed_tools: Vec<String>,

    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Command to execute for build attempts; `{target}` is substituted.
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "xcodebuild".to_string(),
                "build".to_string(),
                "-scheme".to_string(),
                "{target}".to_string(),
            ],
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_passes_per_milestone: 3,
            max_fix_attempts: 2,
            fresh_session_per_milestone: true,
            agent_timeout_secs: 30 * 60,
            build_timeout_secs: 15 * 60,
            agent_output_limit_bytes: 1_000_000,
            build_output_limit_bytes: 200_000,
            prompt_budget_bytes: 60_000,
            base_allowed_tools: vec![
                "Read".to_string(),
                "Write".to_string(),
                "Edit".to_string(),
                "Bash".to_string(),
            ],
            build: BuildConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_passes_per_milestone == 0 {
            return Err(anyhow!("max_passes_per_milestone must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.build_timeout_secs == 0 {
            return Err(anyhow!("build_timeout_secs must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ForgeConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ForgeConfig {
            max_passes_per_milestone: 5,
            fresh_session_per_milestone: false,
            ..ForgeConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let cfg = ForgeConfig {
            max_passes_per_milestone: 0,
            ..ForgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
