//! Payments provider.
//!
//! Prompt capability only: it steers generated purchase flows toward the
//! payments SDK but has nothing to provision and no tools to expose, so
//! provisioning and tool sweeps skip it.

use serde_json::Value;

use crate::provider::{PromptCapability, PromptContribution, Provider};

pub const PROVIDER_ID: &str = "payments";

pub struct PaymentsProvider;

impl Provider for PaymentsProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Payments"
    }

    fn prompt(&self) -> Option<&dyn PromptCapability> {
        Some(self)
    }
}

impl PromptCapability for PaymentsProvider {
    fn contribute(&self, _data_shapes: &Value, config: &Value) -> Option<PromptContribution> {
        let entitlement = config
            .get("entitlement")
            .and_then(Value::as_str)
            .unwrap_or("premium");
        Some(PromptContribution {
            provider_id: PROVIDER_ID.to_string(),
            system_text: format!(
                "Purchases go through the payments SDK. Gate paid features on \
                 the `{entitlement}` entitlement; never roll your own receipt \
                 validation."
            ),
            user_addendum: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contributes_prompt_text_only() {
        let provider = PaymentsProvider;
        assert!(provider.prompt().is_some());
        assert!(provider.setup().is_none());
        assert!(provider.tools().is_none());
        assert!(provider.provisioning().is_none());

        let contribution = provider
            .contribute(&Value::Null, &json!({"entitlement": "pro"}))
            .expect("contribution");
        assert!(contribution.system_text.contains("`pro`"));
        assert_eq!(contribution.user_addendum, None);
    }

    #[test]
    fn entitlement_defaults_without_config() {
        let contribution = PaymentsProvider
            .contribute(&Value::Null, &Value::Null)
            .expect("contribution");
        assert!(contribution.system_text.contains("`premium`"));
    }
}
