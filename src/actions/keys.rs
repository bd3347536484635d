//! Stored provider API keys.

use super::{AgentFlow, require_caller};
use crate::error::{ActionError, ActionResult};
use crate::llm::{LlmProvider, ProviderKind, build_provider};
use crate::types::Agent;
use crate::vault::{Vault, key_context};
use std::sync::Arc;
use tracing::info;

fn parse_provider(name: &str) -> ActionResult<ProviderKind> {
    ProviderKind::from_str(name).ok_or_else(|| {
        ActionError::invalid_value("provider", &format!("Unknown provider '{}'", name))
    })
}

impl AgentFlow {
    fn require_vault(&self, provider: ProviderKind) -> ActionResult<&Arc<Vault>> {
        self.vault
            .as_ref()
            .ok_or_else(|| ActionError::provider_not_configured(provider.as_str()))
    }

    /// Encrypt and store the caller's key for `provider`, replacing any previous one.
    pub fn store_api_key(&self, caller: &str, provider: &str, api_key: &str) -> ActionResult<()> {
        let caller = require_caller(caller)?;
        let kind = parse_provider(provider)?;
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ActionError::missing_field("api_key"));
        }

        let ciphertext = self
            .require_vault(kind)?
            .encrypt(api_key, &key_context(caller, kind.as_str()))
            .map_err(ActionError::internal)?;
        self.db.put_api_key(caller, kind.as_str(), &ciphertext)?;

        info!(owner = %caller, provider = %kind, "Stored API key");
        Ok(())
    }

    /// Returns whether a key was removed.
    pub fn delete_api_key(&self, caller: &str, provider: &str) -> ActionResult<bool> {
        let caller = require_caller(caller)?;
        let kind = parse_provider(provider)?;
        let removed = self.db.delete_api_key(caller, kind.as_str())?;
        if removed {
            info!(owner = %caller, provider = %kind, "Deleted API key");
        }
        Ok(removed)
    }

    /// Providers the caller has keys for. Never the keys themselves.
    pub fn list_api_keys(&self, caller: &str) -> ActionResult<Vec<String>> {
        let caller = require_caller(caller)?;
        Ok(self.db.list_api_key_providers(caller)?)
    }

    /// Build the LLM client for an agent from its owner's stored key.
    pub fn provider_for_agent(&self, agent: &Agent) -> ActionResult<Arc<dyn LlmProvider>> {
        let kind = ProviderKind::from_str(&agent.provider)
            .ok_or_else(|| ActionError::provider_not_configured(&agent.provider))?;
        let vault = self.require_vault(kind)?;

        let ciphertext = self
            .db
            .get_api_key_ciphertext(&agent.owner_id, kind.as_str())?
            .ok_or_else(|| ActionError::provider_not_configured(kind.as_str()))?;
        let api_key = vault
            .decrypt(&ciphertext, &key_context(&agent.owner_id, kind.as_str()))
            .map_err(ActionError::internal)?;

        let providers = &self.config.providers;
        Ok(Arc::from(build_provider(
            kind,
            api_key,
            providers.base_url(kind),
            providers.request_timeout(),
        )))
    }
}
