//! Integration provider registry and capability interfaces.
//!
//! A provider exposes identity unconditionally; every behavior lives behind
//! an optional capability interface discovered with a capability test
//! (`provider.prompt()` returning `Some`), never a type switch on provider
//! identity. The phase sequencer and prompt assembly iterate all registered
//! providers and silently skip the ones that lack the capability needed at
//! that point.

pub mod database;
pub mod payments;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

/// Prompt content a provider injects into a build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContribution {
    pub provider_id: String,
    /// Appended to the pass's system instructions.
    pub system_text: String,
    /// Optional addendum appended to the user message.
    pub user_addendum: Option<String>,
}

/// How the agent reaches one provider-declared tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTransport {
    /// Spawned over stdio.
    Stdio { command: Vec<String> },
    /// Remote endpoint.
    Http { url: String },
}

/// An external callable tool made available to the agent while the
/// provider is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub transport: ToolTransport,
}

/// Result of a provider's one-time external setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Resources the provider created.
    pub created: Vec<String>,
    /// Non-fatal per-resource failures. A missing backend resource is
    /// recoverable later; it never aborts the run.
    pub warnings: Vec<String>,
}

/// Credential acquisition and removal for one named application instance.
pub trait SetupCapability {
    /// Acquire credentials; the returned config is persisted by the caller.
    fn acquire(&self, app_name: &str) -> Result<Value>;
    fn remove(&self, app_name: &str) -> Result<()>;
}

/// Additional prompt content for milestones that need this provider.
pub trait PromptCapability {
    /// `config` is the provider's stored configuration (`Null` when unset).
    fn contribute(&self, data_shapes: &Value, config: &Value) -> Option<PromptContribution>;
}

/// Tools to expose to the agent when this provider is active.
pub trait ToolCapability {
    fn tools(&self, config: &Value) -> Vec<ToolSpec>;
}

/// One-time external resource setup from the plan's declared data shapes.
pub trait ProvisioningCapability {
    fn provision(&self, data_shapes: &Value, features: &[String]) -> Result<ProvisionOutcome>;
}

/// A backend integration. Identity is unconditional; everything else is an
/// optional capability.
pub trait Provider {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;

    fn setup(&self) -> Option<&dyn SetupCapability> {
        None
    }
    fn prompt(&self) -> Option<&dyn PromptCapability> {
        None
    }
    fn tools(&self) -> Option<&dyn ToolCapability> {
        None
    }
    fn provisioning(&self) -> Option<&dyn ProvisioningCapability> {
        None
    }
}

/// Identity-keyed set of providers, populated once at startup and read-only
/// thereafter.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. A duplicate id is a programming error and is
    /// reported immediately rather than silently overwritten.
    pub fn register(&mut self, provider: Box<dyn Provider>) -> Result<()> {
        if self.get(provider.id()).is_some() {
            return Err(anyhow!("provider {} already registered", provider.id()));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Provider> {
        self.providers
            .iter()
            .find(|p| p.id() == id)
            .map(Box::as_ref)
    }

    /// All providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers.iter().map(Box::as_ref)
    }

    /// Registered providers the plan declares, in registration order.
    /// Declared-but-unregistered integrations are skipped.
    pub fn active<'a>(
        &'a self,
        integrations: &'a [String],
    ) -> impl Iterator<Item = &'a dyn Provider> {
        self.iter().filter(|p| integrations.iter().any(|i| i == p.id()))
    }
}

/// Load a provider's stored configuration; `Null` when never set up.
pub fn load_provider_config(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Null);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read provider config {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse provider config {}", path.display()))
}

/// Persist a provider's configuration (temp file + rename).
pub fn write_provider_config(path: &Path, config: &Value) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("provider config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(config)?;
    buf.push('\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, buf).with_context(|| format!("write temp config {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PromptOnly;

    impl Provider for PromptOnly {
        fn id(&self) -> &str {
            "prompt-only"
        }
        fn display_name(&self) -> &str {
            "Prompt Only"
        }
        fn prompt(&self) -> Option<&dyn PromptCapability> {
            Some(self)
        }
    }

    impl PromptCapability for PromptOnly {
        fn contribute(&self, _shapes: &Value, _config: &Value) -> Option<PromptContribution> {
            Some(PromptContribution {
                provider_id: "prompt-only".to_string(),
                system_text: "use the backend".to_string(),
                user_addendum: None,
            })
        }
    }

    struct Bare;

    impl Provider for Bare {
        fn id(&self) -> &str {
            "bare"
        }
        fn display_name(&self) -> &str {
            "Bare"
        }
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(PromptOnly)).expect("first");
        let err = registry.register(Box::new(PromptOnly)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn provisioning_sweep_skips_prompt_only_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(PromptOnly)).expect("register");
        registry.register(Box::new(Bare)).expect("register");

        let integrations = vec!["prompt-only".to_string(), "bare".to_string()];
        let provisioned: Vec<&str> = registry
            .active(&integrations)
            .filter(|p| p.provisioning().is_some())
            .map(Provider::id)
            .collect();
        assert!(provisioned.is_empty());

        let contributing: Vec<&str> = registry
            .active(&integrations)
            .filter(|p| p.prompt().is_some())
            .map(Provider::id)
            .collect();
        assert_eq!(contributing, vec!["prompt-only"]);
    }

    #[test]
    fn active_filters_to_declared_integrations() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(PromptOnly)).expect("register");
        registry.register(Box::new(Bare)).expect("register");

        let integrations = vec!["bare".to_string(), "unknown".to_string()];
        let active: Vec<&str> = registry.active(&integrations).map(Provider::id).collect();
        assert_eq!(active, vec!["bare"]);
    }

    #[test]
    fn provider_config_round_trips_and_defaults_to_null() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("providers/database.json");

        assert_eq!(load_provider_config(&path).expect("missing"), Value::Null);

        let config = json!({"token": "t", "project": "p"});
        write_provider_config(&path, &config).expect("write");
        assert_eq!(load_provider_config(&path).expect("load"), config);
    }
}
