//! Panel configuration.
//!
//! Everything the pipeline needs is injected at construction: the model
//! registry, a credential map resolved once, timeouts, and scheduling.
//! No ambient environment lookups happen after construction, which keeps
//! role resolution pure and tests deterministic.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::PanelRole;

/// Default per-call deadline for a single model invocation.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder API-key value some setup guides leave in config files.
/// Treated the same as an absent credential.
const PLACEHOLDER_KEY: &str = "sk-...";

// ── Cost tier ────────────────────────────────────────────────────

/// Rough cost class of a model, used for registry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    High,
    Medium,
    Low,
}

// ── Model spec ───────────────────────────────────────────────────

/// One registry entry: a model and the role it plays in the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Stable identifier (e.g. "deepseek-r1").
    pub id: String,
    /// Human-friendly name.
    pub label: String,
    pub role: PanelRole,
    /// Provider name (e.g. "deepseek", "gemini").
    pub provider: String,
    pub enabled: bool,
    pub cost_tier: CostTier,
    /// Provider-specific model name sent on the wire.
    pub provider_model_name: String,
    /// Environment variable holding this model's credential.
    pub api_key_var: String,
}

// ── Credential map ───────────────────────────────────────────────

/// Credentials resolved once at construction, keyed by the registry's
/// `api_key_var` names. Presence is checked here; the values themselves
/// are only ever handed to invoker implementations.
#[derive(Debug, Clone, Default)]
pub struct CredentialMap {
    keys: HashMap<String, String>,
}

impl CredentialMap {
    /// Read each registry entry's key variable from the environment, once.
    pub fn from_env(registry: &[ModelSpec]) -> Self {
        let mut keys = HashMap::new();
        for spec in registry {
            if let Ok(value) = std::env::var(&spec.api_key_var) {
                keys.insert(spec.api_key_var.clone(), value);
            }
        }
        Self { keys }
    }

    /// Build from explicit (var, value) pairs. Test- and embedder-friendly.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keys: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Whether a usable credential is present. Empty strings and the
    /// "sk-..." placeholder count as absent.
    pub fn has(&self, var: &str) -> bool {
        match self.keys.get(var) {
            Some(v) => !v.trim().is_empty() && v.trim() != PLACEHOLDER_KEY,
            None => false,
        }
    }

    pub fn get(&self, var: &str) -> Option<&str> {
        self.keys.get(var).map(String::as_str)
    }
}

// ── Scheduling ───────────────────────────────────────────────────

/// When the specialist panel runs relative to the lead stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// Specialists run after the lead stage and can see the lead draft.
    #[default]
    Sequential,
    /// Lead and specialists fan out together; lower latency, specialists
    /// see no lead context.
    Concurrent,
}

// ── Panel config ─────────────────────────────────────────────────

/// Full configuration for one panel instance.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub registry: Vec<ModelSpec>,
    pub credentials: CredentialMap,
    /// Per-invocation deadline.
    pub call_timeout: Duration,
    pub scheduling: Scheduling,
    /// System prompt prepended to every stage, if any.
    pub system_prompt: Option<String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        let registry = stock_registry();
        let credentials = CredentialMap::from_env(&registry);
        Self {
            registry,
            credentials,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            scheduling: Scheduling::default(),
            system_prompt: None,
        }
    }
}

impl PanelConfig {
    /// Stock registry with explicit credentials (no environment reads).
    pub fn with_credentials(credentials: CredentialMap) -> Self {
        Self {
            registry: stock_registry(),
            credentials,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            scheduling: Scheduling::default(),
            system_prompt: None,
        }
    }
}

/// The stock panel roster.
pub fn stock_registry() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: "deepseek-r1".into(),
            label: "DeepSeek R1".into(),
            role: PanelRole::LeadThinker,
            provider: "deepseek".into(),
            enabled: true,
            cost_tier: CostTier::High,
            provider_model_name: "deepseek-reasoner".into(),
            api_key_var: "DEEPSEEK_API_KEY".into(),
        },
        ModelSpec {
            id: "deepseek-v3.2".into(),
            label: "DeepSeek V3.2".into(),
            role: PanelRole::Reviewer,
            provider: "deepseek".into(),
            enabled: true,
            cost_tier: CostTier::Medium,
            provider_model_name: "deepseek-chat".into(),
            api_key_var: "DEEPSEEK_API_KEY".into(),
        },
        ModelSpec {
            id: "gemini-2.0-flash".into(),
            label: "Gemini 2.0 Flash".into(),
            role: PanelRole::Synthesizer,
            provider: "gemini".into(),
            enabled: true,
            cost_tier: CostTier::Low,
            provider_model_name: "gemini-2.0-flash".into(),
            api_key_var: "GEMINI_API_KEY".into(),
        },
        ModelSpec {
            id: "perplexity-sonar-reasoning".into(),
            label: "Perplexity Sonar Reasoning".into(),
            role: PanelRole::Research,
            provider: "perplexity".into(),
            enabled: true,
            cost_tier: CostTier::Medium,
            provider_model_name: "sonar-reasoning".into(),
            api_key_var: "PERPLEXITY_API_KEY".into(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_presence_checks() {
        let creds = CredentialMap::from_pairs([
            ("GOOD_KEY", "sk-real-key"),
            ("EMPTY_KEY", ""),
            ("PLACEHOLDER_KEY", "sk-..."),
            ("PADDED_KEY", "  "),
        ]);
        assert!(creds.has("GOOD_KEY"));
        assert!(!creds.has("EMPTY_KEY"));
        assert!(!creds.has("PLACEHOLDER_KEY"));
        assert!(!creds.has("PADDED_KEY"));
        assert!(!creds.has("MISSING_KEY"));
    }

    #[test]
    fn stock_registry_covers_panel_roles() {
        let registry = stock_registry();
        for role in [
            PanelRole::LeadThinker,
            PanelRole::Reviewer,
            PanelRole::Synthesizer,
        ] {
            assert!(
                registry.iter().any(|m| m.role == role && m.enabled),
                "missing {role}"
            );
        }
    }
}
