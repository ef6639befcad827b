//! Model role routing.
//!
//! Resolves which concrete model serves each panel role, applying the
//! fixed fallback chain: Lead Thinker degrades to the Reviewer's model,
//! the Reviewer to the Lead resolution, the Synthesizer to the Reviewer
//! resolution. Degradation is monotone; the only hard failure is when no
//! model is available for a required role at all.
//!
//! Resolution is a pure function over the injected registry and
//! credential map: no environment reads, no side effects.

use serde::{Deserialize, Serialize};

use crate::config::{CredentialMap, ModelSpec, PanelConfig};
use crate::error::PanelError;
use crate::report::AnalysisMode;

// ── Panel role ───────────────────────────────────────────────────

/// Role a model plays in the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelRole {
    /// First stage: deep reasoning, firm position, evidence-backed findings.
    LeadThinker,
    /// Second stage: critique of the lead draft.
    Reviewer,
    /// Final stage: merges lead and review into one report.
    Synthesizer,
    /// Single-call specialist agents (risk, feasibility, cost).
    Specialist,
    /// Web-research tier. Registered but not part of the 3-stage panel.
    Research,
}

impl PanelRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::LeadThinker => "lead_thinker",
            Self::Reviewer => "reviewer",
            Self::Synthesizer => "synthesizer",
            Self::Specialist => "specialist",
            Self::Research => "research",
        }
    }
}

impl std::fmt::Display for PanelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Model handle ─────────────────────────────────────────────────

/// A resolved, invokable model reference handed to the invocation port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHandle {
    /// Registry id (e.g. "deepseek-r1").
    pub id: String,
    pub provider: String,
    /// Provider-specific model name.
    pub model_name: String,
    /// The role this handle was resolved for. A fallback keeps the
    /// requested role tag, not the registry entry's own role.
    pub role: PanelRole,
}

// ── Router ───────────────────────────────────────────────────────

/// Pure role → model resolution over a registry and credential map.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Vec<ModelSpec>,
    credentials: CredentialMap,
}

impl Router {
    pub fn new(registry: Vec<ModelSpec>, credentials: CredentialMap) -> Self {
        Self {
            registry,
            credentials,
        }
    }

    pub fn from_config(config: &PanelConfig) -> Self {
        Self::new(config.registry.clone(), config.credentials.clone())
    }

    /// Resolve the model serving `role` for the given analysis mode.
    ///
    /// All modes currently share the same roster; `mode` is part of the
    /// contract so mode-specific panels can be added without touching
    /// call sites.
    pub fn resolve(&self, role: PanelRole, mode: AnalysisMode) -> Result<ModelHandle, PanelError> {
        let resolved = match role {
            PanelRole::LeadThinker => self
                .first_available(PanelRole::LeadThinker)
                .or_else(|| self.first_available(PanelRole::Reviewer)),
            PanelRole::Reviewer => match self.first_available(PanelRole::Reviewer) {
                Some(spec) => Some(spec),
                None => return self.resolve_as(PanelRole::LeadThinker, role, mode),
            },
            PanelRole::Synthesizer => match self.first_available(PanelRole::Synthesizer) {
                Some(spec) => Some(spec),
                None => return self.resolve_as(PanelRole::Reviewer, role, mode),
            },
            // Specialists run on the reviewer tier.
            PanelRole::Specialist => return self.resolve_as(PanelRole::Reviewer, role, mode),
            PanelRole::Research => match self.first_available(PanelRole::Research) {
                Some(spec) => Some(spec),
                None => return self.resolve_as(PanelRole::Reviewer, role, mode),
            },
        };

        match resolved {
            Some(spec) => {
                if spec.role != role {
                    tracing::warn!(
                        requested = %role,
                        fallback = %spec.id,
                        "Role degraded to fallback model"
                    );
                }
                Ok(handle_for(spec, role))
            }
            None => Err(PanelError::NoModelAvailable { role }),
        }
    }

    /// Resolve via another role's chain but tag the handle with the
    /// originally requested role.
    fn resolve_as(
        &self,
        via: PanelRole,
        requested: PanelRole,
        mode: AnalysisMode,
    ) -> Result<ModelHandle, PanelError> {
        match self.resolve(via, mode) {
            Ok(mut handle) => {
                handle.role = requested;
                Ok(handle)
            }
            Err(PanelError::NoModelAvailable { .. }) => {
                Err(PanelError::NoModelAvailable { role: requested })
            }
            Err(e) => Err(e),
        }
    }

    /// First enabled registry entry for `role` whose credential is present.
    fn first_available(&self, role: PanelRole) -> Option<&ModelSpec> {
        self.registry
            .iter()
            .find(|spec| spec.role == role && spec.enabled && self.credentials.has(&spec.api_key_var))
    }
}

fn handle_for(spec: &ModelSpec, role: PanelRole) -> ModelHandle {
    ModelHandle {
        id: spec.id.clone(),
        provider: spec.provider.clone(),
        model_name: spec.provider_model_name.clone(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::stock_registry;

    const MODE: AnalysisMode = AnalysisMode::PipelineDiagnosis;

    fn router_with_keys(pairs: &[(&str, &str)]) -> Router {
        Router::new(
            stock_registry(),
            CredentialMap::from_pairs(pairs.iter().copied()),
        )
    }

    #[test]
    fn all_roles_resolve_with_full_credentials() {
        let router = router_with_keys(&[
            ("DEEPSEEK_API_KEY", "sk-deepseek"),
            ("GEMINI_API_KEY", "sk-gemini"),
        ]);
        assert_eq!(
            router.resolve(PanelRole::LeadThinker, MODE).unwrap().id,
            "deepseek-r1"
        );
        assert_eq!(
            router.resolve(PanelRole::Reviewer, MODE).unwrap().id,
            "deepseek-v3.2"
        );
        assert_eq!(
            router.resolve(PanelRole::Synthesizer, MODE).unwrap().id,
            "gemini-2.0-flash"
        );
    }

    #[test]
    fn specialist_rides_reviewer_tier() {
        let router = router_with_keys(&[("DEEPSEEK_API_KEY", "sk-deepseek")]);
        let handle = router.resolve(PanelRole::Specialist, MODE).unwrap();
        assert_eq!(handle.id, "deepseek-v3.2");
        assert_eq!(handle.role, PanelRole::Specialist);
    }

    #[test]
    fn synthesizer_falls_back_to_reviewer() {
        // No Gemini credential: synthesizer degrades to the reviewer model.
        let router = router_with_keys(&[("DEEPSEEK_API_KEY", "sk-deepseek")]);
        let handle = router.resolve(PanelRole::Synthesizer, MODE).unwrap();
        assert_eq!(handle.id, "deepseek-v3.2");
        assert_eq!(handle.role, PanelRole::Synthesizer);
    }

    #[test]
    fn lead_falls_back_to_reviewer_model() {
        let mut registry = stock_registry();
        // Disable the lead entry; its credential alone no longer matters.
        registry[0].enabled = false;
        let router = Router::new(
            registry,
            CredentialMap::from_pairs([("DEEPSEEK_API_KEY", "sk-deepseek")]),
        );
        let handle = router.resolve(PanelRole::LeadThinker, MODE).unwrap();
        assert_eq!(handle.id, "deepseek-v3.2");
        assert_eq!(handle.role, PanelRole::LeadThinker);
    }

    #[test]
    fn no_credentials_is_fatal_for_every_panel_role() {
        let router = router_with_keys(&[]);
        for role in [
            PanelRole::LeadThinker,
            PanelRole::Reviewer,
            PanelRole::Synthesizer,
            PanelRole::Specialist,
        ] {
            let err = router.resolve(role, MODE).unwrap_err();
            match err {
                PanelError::NoModelAvailable { role: failed } => assert_eq!(failed, role),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn placeholder_credential_counts_as_absent() {
        let router = router_with_keys(&[
            ("DEEPSEEK_API_KEY", "sk-..."),
            ("GEMINI_API_KEY", "sk-gemini"),
        ]);
        // Both DeepSeek entries are unavailable; synthesizer still resolves
        // directly, lead/reviewer chains land on nothing.
        assert!(router.resolve(PanelRole::LeadThinker, MODE).is_err());
        assert_eq!(
            router.resolve(PanelRole::Synthesizer, MODE).unwrap().id,
            "gemini-2.0-flash"
        );
    }
}
