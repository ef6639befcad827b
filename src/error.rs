//! Error taxonomy for the panel engine.
//!
//! Two families: [`InvokeError`] is what the model invocation port can
//! fail with, [`PanelError`] is what the pipeline itself surfaces to
//! callers. Everything else (unparseable output, unverifiable evidence,
//! stage degradation) is absorbed into the returned report and is not an
//! error at this level.

use std::time::Duration;

use crate::router::PanelRole;

/// Failure from a single model invocation.
///
/// The pipeline branches on "succeeded vs failed" for all variants except
/// [`InvokeError::Auth`], which short-circuits the lead stage with a
/// dedicated configuration-guidance report.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The provider rejected the request credentials (401/invalid key).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The call did not complete within the per-call deadline, or the
    /// caller's cancellation token fired while waiting.
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other provider-side failure (network, 5xx, malformed response).
    #[error("provider error: {0}")]
    Provider(String),
}

/// Fatal pipeline errors.
///
/// `Panel::run` returns `Err` only for these; every recoverable condition
/// terminates with a valid [`Report`](crate::report::Report) instead.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// No enabled model with a present credential satisfies a required role,
    /// including its fallback chain.
    #[error("no model available for role {role}: check registry and credentials")]
    NoModelAvailable {
        /// The role that could not be resolved.
        role: PanelRole,
    },

    /// Malformed caller input (e.g. an empty question).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_error_display() {
        let e = InvokeError::Auth("401 invalid api key".into());
        assert!(e.to_string().contains("authentication failed"));

        let e = InvokeError::Timeout(Duration::from_secs(60));
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn panel_error_names_role() {
        let e = PanelError::NoModelAvailable {
            role: PanelRole::LeadThinker,
        };
        assert!(e.to_string().contains("lead_thinker"));
    }
}
