//! Model invocation port.
//!
//! The panel never talks to a provider directly; concrete HTTP clients
//! live outside this crate and implement [`ModelInvoker`]. The pipeline
//! only branches on "succeeded vs failed" plus the auth distinction, never
//! on provider specifics.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::InvokeError;
use crate::router::ModelHandle;

/// Raw result of one model call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOutput {
    /// The model's full text response.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ModelOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Abstract capability: invoke a role-tagged model with a prompt, get text
/// back or a typed failure within a bounded time.
///
/// Implementations may retry transiently at their own layer; the pipeline
/// itself never retries the lead stage.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model: &ModelHandle,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<ModelOutput, InvokeError>;
}

/// Invoke with a per-call timeout and cooperative cancellation. Both
/// elapsed time and cancellation surface as [`InvokeError::Timeout`]; the
/// pipeline treats them identically.
pub async fn invoke_bounded(
    invoker: &dyn ModelInvoker,
    model: &ModelHandle,
    prompt: &str,
    system_prompt: Option<&str>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ModelOutput, InvokeError> {
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(model = %model.id, "Invocation cancelled");
            Err(InvokeError::Timeout(timeout))
        }
        outcome = tokio::time::timeout(timeout, invoker.invoke(model, prompt, system_prompt)) => {
            match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(model = %model.id, timeout_s = timeout.as_secs(), "Invocation timed out");
                    Err(InvokeError::Timeout(timeout))
                }
            }
        }
    }
}
