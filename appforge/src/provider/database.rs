//! Managed-database provider.
//!
//! Provisions one backing table per declared data shape over the management
//! API, contributes data-access prompt guidance, and exposes a query tool to
//! the agent. Per-resource provisioning failures are warnings, never aborts.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::io::http::{ApiStatus, ManagementApi};
use crate::provider::{
    PromptCapability, PromptContribution, Provider, ProvisionOutcome, ProvisioningCapability,
    SetupCapability, ToolCapability, ToolSpec, ToolTransport,
};

pub const PROVIDER_ID: &str = "database";

/// Environment variable holding the management-API token for setup.
pub const TOKEN_ENV: &str = "APPFORGE_DB_TOKEN";

pub struct DatabaseProvider {
    api: ManagementApi,
    /// Endpoint handed to the agent's query tool.
    query_url: String,
}

impl DatabaseProvider {
    pub fn new(api: ManagementApi, query_url: impl Into<String>) -> Self {
        Self {
            api,
            query_url: query_url.into(),
        }
    }

    fn create_table(&self, name: &str, shape: &Value) -> Result<bool> {
        let body = json!({ "name": name, "columns": shape.get("fields").unwrap_or(shape) });
        let response = self.api.post("v1/tables", &body)?;
        match response.classify() {
            ApiStatus::Success => Ok(true),
            ApiStatus::Conflict => {
                // Already exists: confirm with find-existing instead of failing.
                debug!(table = name, "table already exists, confirming");
                let existing = self.api.get(&format!("v1/tables/{name}"))?;
                if existing.classify() == ApiStatus::Success {
                    Ok(false)
                } else {
                    Err(anyhow!(
                        "table {name} conflicted but lookup failed: {}",
                        existing.error_detail()
                    ))
                }
            }
            ApiStatus::Failure => Err(anyhow!(
                "create table {name} failed: {}",
                response.error_detail()
            )),
        }
    }
}

impl Provider for DatabaseProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Managed Database"
    }

    fn setup(&self) -> Option<&dyn SetupCapability> {
        Some(self)
    }

    fn prompt(&self) -> Option<&dyn PromptCapability> {
        Some(self)
    }

    fn tools(&self) -> Option<&dyn ToolCapability> {
        Some(self)
    }

    fn provisioning(&self) -> Option<&dyn ProvisioningCapability> {
        Some(self)
    }
}

impl SetupCapability for DatabaseProvider {
    fn acquire(&self, app_name: &str) -> Result<Value> {
        let token = std::env::var(TOKEN_ENV)
            .with_context(|| format!("{TOKEN_ENV} must be set to connect the database"))?;
        info!(app = app_name, "acquired database credentials");
        Ok(json!({ "app": app_name, "token": token }))
    }

    fn remove(&self, app_name: &str) -> Result<()> {
        let response = self.api.delete(&format!("v1/apps/{app_name}"))?;
        if response.classify() == ApiStatus::Failure {
            return Err(anyhow!(
                "remove app {app_name} failed: {}",
                response.error_detail()
            ));
        }
        Ok(())
    }
}

impl PromptCapability for DatabaseProvider {
    fn contribute(&self, data_shapes: &Value, _config: &Value) -> Option<PromptContribution> {
        let tables: Vec<&str> = match data_shapes.as_object() {
            Some(map) if !map.is_empty() => map.keys().map(String::as_str).collect(),
            _ => return None,
        };
        Some(PromptContribution {
            provider_id: PROVIDER_ID.to_string(),
            system_text: format!(
                "Persistence uses the managed database. Backing tables exist for: {}. \
                 Read and write through the generated data-access layer only; \
                 never hardcode connection strings.",
                tables.join(", ")
            ),
            user_addendum: Some(
                "Wire every entity's data access to its managed database table.".to_string(),
            ),
        })
    }
}

impl ToolCapability for DatabaseProvider {
    fn tools(&self, _config: &Value) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "db_query".to_string(),
            transport: ToolTransport::Http {
                url: self.query_url.clone(),
            },
        }]
    }
}

impl ProvisioningCapability for DatabaseProvider {
    fn provision(&self, data_shapes: &Value, features: &[String]) -> Result<ProvisionOutcome> {
        let mut outcome = ProvisionOutcome::default();
        let Some(shapes) = data_shapes.as_object() else {
            return Ok(outcome);
        };

        for (name, shape) in shapes {
            match self.create_table(name, shape) {
                Ok(true) => outcome.created.push(format!("table {name}")),
                Ok(false) => debug!(table = name, "reusing existing table"),
                Err(err) => {
                    warn!(table = name, err = %err, "provisioning failed, continuing");
                    outcome.warnings.push(format!("{err:#}"));
                }
            }
        }

        for feature in features {
            if feature == "realtime" {
                let response = self.api.post("v1/features/realtime", &json!({}))?;
                match response.classify() {
                    ApiStatus::Success | ApiStatus::Conflict => {
                        outcome.created.push("feature realtime".to_string());
                    }
                    ApiStatus::Failure => outcome.warnings.push(format!(
                        "enable realtime failed: {}",
                        response.error_detail()
                    )),
                }
            }
        }

        Ok(outcome)
    }
}
