//! Specialist side panel.
//!
//! Three optional sub-agents enrich the main report with orthogonal views:
//! a risk forecaster, a feasibility analyst, and an economic optimizer.
//! They fan out concurrently, share the reviewer-tier model, and fail in
//! isolation: one slot's error never touches the others or the main
//! pipeline. Their outputs land under `metadata.extendedAgentOutputs` and
//! callers must treat any slot as possibly absent or failed.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::invoke::{invoke_bounded, ModelInvoker};
use crate::normalize::extract_json_value;
use crate::report::{AnalysisRequest, Report};
use crate::router::ModelHandle;
use crate::snapshot::RepoSnapshot;

/// The economic optimizer only runs for substantial questions; below this
/// many characters there is nothing to cost-model and the slot is skipped
/// outright (absent, not failed).
pub const ECONOMIC_QUESTION_THRESHOLD: usize = 500;

// ── Slot container ───────────────────────────────────────────────

/// One specialist's output: either its typed result or an isolated failure
/// record. Serialized untagged so a successful slot reads as its payload
/// and a failed one as `{"error": ..., "partial": true}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecialistSlot<T> {
    Failed { error: String, partial: bool },
    Ok(T),
}

impl<T> SpecialistSlot<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            partial: true,
        }
    }
}

/// Container for every specialist output, attached to report metadata.
/// `None` means the slot was skipped, not that it failed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedAgentOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_forecast: Option<SpecialistSlot<RiskForecast>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feasibility_analysis: Option<SpecialistSlot<FeasibilityAnalysis>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub economic_model: Option<SpecialistSlot<EconomicModel>>,
}

// ── Typed outputs ────────────────────────────────────────────────

/// Risk forecaster: likely failure windows over the near future.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskForecast {
    pub summary: String,
    pub windows: Vec<RiskWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskWindow {
    /// Human label for the horizon ("next 7 days", "next quarter").
    pub window: String,
    pub risks: Vec<RiskItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskItem {
    pub title: String,
    pub description: String,
    /// 0-100 probability estimate, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<u8>,
    /// 1-10, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
}

/// Feasibility analyst: how realistic each recommendation is to execute.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FeasibilityAnalysis {
    pub summary: String,
    pub entries: Vec<FeasibilityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FeasibilityEntry {
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feasibility_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_minutes: Option<u32>,
    pub blockers: Vec<String>,
}

/// Economic optimizer: cost structure of the queried system and savings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomicModel {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_cost: Option<QueryCost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_cost: Option<MonthlyCost>,
    pub advice: Vec<CostAdvice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryCost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MonthlyCost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumed_queries_per_month: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CostAdvice {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_estimate: Option<String>,
}

// ── Prompts ──────────────────────────────────────────────────────

fn shared_context(request: &AnalysisRequest, snapshot: &RepoSnapshot) -> String {
    format!(
        "{}\n=== QUESTION ===\n{}\n",
        snapshot.summary_block(),
        request.question
    )
}

/// Lead findings rendered for the risk forecaster. Empty when the panel
/// runs concurrently with the lead stage.
fn lead_findings_block(lead: Option<&Report>) -> String {
    let lead = match lead {
        Some(lead) if !lead.findings.is_empty() => lead,
        _ => return String::new(),
    };
    let mut block = String::from("\n=== LEAD DRAFT FINDINGS ===\n");
    for f in &lead.findings {
        block.push_str(&format!(
            "- [severity {}] {}: {}\n",
            f.severity, f.title, f.description
        ));
    }
    block
}

/// Lead recommendations rendered for the feasibility analyst.
fn lead_recommendations_block(lead: Option<&Report>) -> String {
    let lead = match lead {
        Some(lead) if !lead.recommendations.is_empty() => lead,
        _ => return String::new(),
    };
    let mut block = String::from("\n=== LEAD DRAFT RECOMMENDATIONS ===\n");
    for r in &lead.recommendations {
        block.push_str(&format!("- {}: {}\n", r.title, r.description));
    }
    block
}

fn risk_prompt(request: &AnalysisRequest, snapshot: &RepoSnapshot, lead: Option<&Report>) -> String {
    format!(
        "ROLE: Risk forecaster.\n\
         Given the system and question below, forecast the most likely failure modes over \
         concrete time windows. Respond as JSON:\n\
         {{\"riskHeatmap\": {{\"summary\": \"...\", \"windows\": [{{\"window\": \"next 7 days\", \
         \"risks\": [{{\"title\": \"...\", \"description\": \"...\", \"likelihood\": 0-100, \
         \"severity\": 1-10}}]}}]}}}}\n\n{}{}",
        shared_context(request, snapshot),
        lead_findings_block(lead),
    )
}

fn feasibility_prompt(
    request: &AnalysisRequest,
    snapshot: &RepoSnapshot,
    lead: Option<&Report>,
) -> String {
    format!(
        "ROLE: Feasibility analyst.\n\
         Assess how realistic it is to act on the question below given the repository's state. \
         Respond as JSON:\n\
         {{\"feasibilityAnalysis\": {{\"summary\": \"...\", \"entries\": [{{\"recommendation\": \
         \"...\", \"feasibilityScore\": 0-100, \"focusMinutes\": <minutes>, \"blockers\": \
         [\"...\"]}}]}}}}\n\n{}{}",
        shared_context(request, snapshot),
        lead_recommendations_block(lead),
    )
}

fn economic_prompt(request: &AnalysisRequest, snapshot: &RepoSnapshot) -> String {
    format!(
        "ROLE: Economic optimizer.\n\
         Model the cost structure implied by the question below and propose savings. Respond as \
         JSON:\n\
         {{\"economicAnalysis\": {{\"summary\": \"...\", \"queryCost\": {{\"currentUsd\": <usd>, \
         \"optimizedUsd\": <usd>}}, \"monthlyCost\": {{\"currentUsd\": <usd>, \"optimizedUsd\": \
         <usd>, \"assumedQueriesPerMonth\": <n>}}, \"advice\": [{{\"title\": \"...\", \
         \"description\": \"...\", \"savingsEstimate\": \"...\"}}]}}}}\n\n{}",
        shared_context(request, snapshot)
    )
}

// ── Fan-out ──────────────────────────────────────────────────────

/// Run the specialist panel. Always returns a container: failed slots are
/// recorded as [`SpecialistSlot::Failed`], and the economic slot is absent
/// entirely when the question is below [`ECONOMIC_QUESTION_THRESHOLD`].
///
/// `lead` is the normalized lead draft when it is already available
/// (sequential scheduling); concurrent scheduling passes `None` and the
/// specialists work from the request alone.
#[allow(clippy::too_many_arguments)]
pub async fn run_panel(
    invoker: &dyn ModelInvoker,
    handle: &ModelHandle,
    system_prompt: Option<&str>,
    call_timeout: Duration,
    cancel: &CancellationToken,
    request: &AnalysisRequest,
    snapshot: &RepoSnapshot,
    lead: Option<&Report>,
) -> ExtendedAgentOutputs {
    let economic_eligible = request.question.chars().count() >= ECONOMIC_QUESTION_THRESHOLD;

    let (risk, feasibility, economic) = tokio::join!(
        run_slot::<RiskForecast>(
            "risk_forecaster",
            "riskHeatmap",
            risk_prompt(request, snapshot, lead),
            invoker,
            handle,
            system_prompt,
            call_timeout,
            cancel,
        ),
        run_slot::<FeasibilityAnalysis>(
            "feasibility_analyst",
            "feasibilityAnalysis",
            feasibility_prompt(request, snapshot, lead),
            invoker,
            handle,
            system_prompt,
            call_timeout,
            cancel,
        ),
        async {
            if !economic_eligible {
                tracing::debug!(
                    question_chars = request.question.chars().count(),
                    "Economic optimizer skipped for short question"
                );
                return None;
            }
            Some(
                run_slot::<EconomicModel>(
                    "economic_optimizer",
                    "economicAnalysis",
                    economic_prompt(request, snapshot),
                    invoker,
                    handle,
                    system_prompt,
                    call_timeout,
                    cancel,
                )
                .await,
            )
        },
    );

    ExtendedAgentOutputs {
        risk_forecast: Some(risk),
        feasibility_analysis: Some(feasibility),
        economic_model: economic,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_slot<T: DeserializeOwned>(
    name: &str,
    wrapper_key: &str,
    prompt: String,
    invoker: &dyn ModelInvoker,
    handle: &ModelHandle,
    system_prompt: Option<&str>,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> SpecialistSlot<T> {
    let output =
        match invoke_bounded(invoker, handle, &prompt, system_prompt, call_timeout, cancel).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(specialist = name, error = %err, "Specialist invocation failed");
                return SpecialistSlot::failed(err.to_string());
            }
        };
    match parse_slot(&output.text, wrapper_key) {
        Ok(parsed) => SpecialistSlot::Ok(parsed),
        Err(reason) => {
            tracing::warn!(specialist = name, %reason, "Specialist output unparseable");
            SpecialistSlot::failed(reason)
        }
    }
}

/// Accept either the wrapper object the prompt asks for or the bare
/// payload; models split on this about evenly.
fn parse_slot<T: DeserializeOwned>(raw: &str, wrapper_key: &str) -> Result<T, String> {
    let value = extract_json_value(raw, serde_json::Value::is_object)
        .ok_or_else(|| "no JSON object in specialist output".to_string())?;
    let payload = match value.get(wrapper_key) {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    };
    serde_json::from_value(payload).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use crate::invoke::ModelOutput;
    use crate::report::AnalysisMode;
    use crate::router::PanelRole;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers each call from a queue, keyed by a marker in the prompt.
    struct ScriptedInvoker {
        responses: Mutex<Vec<(&'static str, Result<&'static str, InvokeError>)>>,
    }

    impl ScriptedInvoker {
        fn new(responses: Vec<(&'static str, Result<&'static str, InvokeError>)>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ModelInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            _model: &ModelHandle,
            prompt: &str,
            _system_prompt: Option<&str>,
        ) -> Result<ModelOutput, InvokeError> {
            let mut responses = self.responses.lock().unwrap();
            let idx = responses
                .iter()
                .position(|(marker, _)| prompt.contains(marker))
                .unwrap_or_else(|| panic!("unexpected prompt: {prompt}"));
            let (_, response) = responses.remove(idx);
            response.map(ModelOutput::text)
        }
    }

    fn handle() -> ModelHandle {
        ModelHandle {
            id: "deepseek-v3.2".into(),
            provider: "deepseek".into(),
            model_name: "deepseek-chat".into(),
            role: PanelRole::Specialist,
        }
    }

    fn long_question() -> String {
        "why is the nightly ingest pipeline slow? ".repeat(20)
    }

    const RISK_JSON: &str = r#"{"riskHeatmap": {"summary": "two hot windows",
        "windows": [{"window": "next 7 days", "risks": [{"title": "queue overflow",
        "description": "d", "likelihood": 70, "severity": 8}]}]}}"#;
    const FEAS_JSON: &str = r#"{"feasibilityAnalysis": {"summary": "mostly doable",
        "entries": [{"recommendation": "bound the queue", "feasibilityScore": 85,
        "focusMinutes": 120, "blockers": []}]}}"#;
    const ECON_JSON: &str = r#"{"economicAnalysis": {"summary": "cheap to fix",
        "queryCost": {"currentUsd": 0.04, "optimizedUsd": 0.01},
        "advice": [{"title": "cache embeddings", "description": "d"}]}}"#;

    #[tokio::test]
    async fn all_slots_succeed_on_long_question() {
        let invoker = ScriptedInvoker::new(vec![
            ("Risk forecaster", Ok(RISK_JSON)),
            ("Feasibility analyst", Ok(FEAS_JSON)),
            ("Economic optimizer", Ok(ECON_JSON)),
        ]);
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, long_question());
        let outputs = run_panel(
            &invoker,
            &handle(),
            None,
            Duration::from_secs(5),
            &CancellationToken::new(),
            &request,
            &RepoSnapshot::empty("/repo"),
            None,
        )
        .await;

        match outputs.risk_forecast.unwrap() {
            SpecialistSlot::Ok(forecast) => {
                assert_eq!(forecast.windows[0].risks[0].likelihood, Some(70));
            }
            other => panic!("risk slot failed: {other:?}"),
        }
        assert!(!outputs.feasibility_analysis.unwrap().is_failed());
        assert!(!outputs.economic_model.unwrap().is_failed());
    }

    #[tokio::test]
    async fn economic_skipped_below_threshold() {
        let invoker = ScriptedInvoker::new(vec![
            ("Risk forecaster", Ok(RISK_JSON)),
            ("Feasibility analyst", Ok(FEAS_JSON)),
        ]);
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "short question");
        let outputs = run_panel(
            &invoker,
            &handle(),
            None,
            Duration::from_secs(5),
            &CancellationToken::new(),
            &request,
            &RepoSnapshot::empty("/repo"),
            None,
        )
        .await;
        assert!(outputs.economic_model.is_none());
        assert!(outputs.risk_forecast.is_some());
    }

    #[tokio::test]
    async fn one_failure_does_not_touch_other_slots() {
        let invoker = ScriptedInvoker::new(vec![
            ("Risk forecaster", Ok(RISK_JSON)),
            (
                "Feasibility analyst",
                Err(InvokeError::Provider("503 from upstream".into())),
            ),
            ("Economic optimizer", Ok(ECON_JSON)),
        ]);
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, long_question());
        let outputs = run_panel(
            &invoker,
            &handle(),
            None,
            Duration::from_secs(5),
            &CancellationToken::new(),
            &request,
            &RepoSnapshot::empty("/repo"),
            None,
        )
        .await;

        match outputs.feasibility_analysis.unwrap() {
            SpecialistSlot::Failed { error, partial } => {
                assert!(error.contains("503"));
                assert!(partial);
            }
            SpecialistSlot::Ok(_) => panic!("feasibility should have failed"),
        }
        assert!(!outputs.risk_forecast.unwrap().is_failed());
        assert!(!outputs.economic_model.unwrap().is_failed());
    }

    #[tokio::test]
    async fn unparseable_output_becomes_failed_slot() {
        let invoker = ScriptedInvoker::new(vec![
            ("Risk forecaster", Ok("I cannot answer in JSON today.")),
            ("Feasibility analyst", Ok(FEAS_JSON)),
        ]);
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "short");
        let outputs = run_panel(
            &invoker,
            &handle(),
            None,
            Duration::from_secs(5),
            &CancellationToken::new(),
            &request,
            &RepoSnapshot::empty("/repo"),
            None,
        )
        .await;
        assert!(outputs.risk_forecast.unwrap().is_failed());
        assert!(!outputs.feasibility_analysis.unwrap().is_failed());
    }

    #[test]
    fn prompts_embed_lead_draft_when_available() {
        use crate::report::{AnalysisMode, Finding, Recommendation};

        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "q");
        let snapshot = RepoSnapshot::empty("/repo");
        let mut lead = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        lead.findings.push(Finding {
            id: "f1".into(),
            title: "unbounded queue".into(),
            description: "grows forever".into(),
            severity: 7,
            ..Finding::default()
        });
        lead.recommendations.push(Recommendation {
            id: "r1".into(),
            title: "bound the queue".into(),
            description: "cap at 10k".into(),
            ..Recommendation::default()
        });

        let risk = risk_prompt(&request, &snapshot, Some(&lead));
        assert!(risk.contains("LEAD DRAFT FINDINGS"));
        assert!(risk.contains("unbounded queue"));

        let feas = feasibility_prompt(&request, &snapshot, Some(&lead));
        assert!(feas.contains("LEAD DRAFT RECOMMENDATIONS"));
        assert!(feas.contains("bound the queue"));

        // Concurrent scheduling has no draft to show.
        assert!(!risk_prompt(&request, &snapshot, None).contains("LEAD DRAFT"));
        assert!(!feasibility_prompt(&request, &snapshot, None).contains("LEAD DRAFT"));
    }

    #[test]
    fn bare_payload_accepted_without_wrapper() {
        let bare = r#"{"summary": "s", "windows": []}"#;
        let forecast: RiskForecast = parse_slot(bare, "riskHeatmap").unwrap();
        assert_eq!(forecast.summary, "s");
    }

    #[test]
    fn failed_slot_serializes_with_partial_flag() {
        let slot: SpecialistSlot<RiskForecast> = SpecialistSlot::failed("timed out");
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["error"], "timed out");
        assert_eq!(json["partial"], true);
        let back: SpecialistSlot<RiskForecast> = serde_json::from_value(json).unwrap();
        assert!(back.is_failed());
    }
}
