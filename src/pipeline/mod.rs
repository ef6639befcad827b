//! The 3-stage panel pipeline.
//!
//! One run walks LEAD -> REVIEW -> SYNTHESIZE -> DONE. Degradation is
//! monotone: a failed review or synthesis falls back to the best earlier
//! artifact and the run still completes with a valid report. Only the lead
//! stage can abort the run, and even then the caller receives a structured
//! error report rather than an `Err`; `run` itself fails only for
//! unresolvable roles or malformed input.

pub mod prompts;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::{PanelConfig, Scheduling};
use crate::error::{InvokeError, PanelError};
use crate::invoke::{invoke_bounded, ModelInvoker};
use crate::normalize;
use crate::report::{AnalysisRequest, Finding, Recommendation, Report, ReviewDraft};
use crate::router::{ModelHandle, PanelRole, Router};
use crate::snapshot::RepoSnapshot;
use crate::specialist::{self, ExtendedAgentOutputs};
use crate::verify;

/// Pipeline stages, in order. ERROR is reachable only from LEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Lead,
    Review,
    Synthesize,
    Done,
    Error,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lead => "lead",
            Self::Review => "review",
            Self::Synthesize => "synthesize",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ── Panel ────────────────────────────────────────────────────────

/// A configured panel: registry, credentials, and an invocation port.
/// Cheap to clone per run via the shared invoker.
pub struct Panel {
    config: PanelConfig,
    router: Router,
    invoker: Arc<dyn ModelInvoker>,
}

impl Panel {
    pub fn new(config: PanelConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        let router = Router::from_config(&config);
        Self {
            config,
            router,
            invoker,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Returns `Err` only when the request is malformed or a required role
    /// has no resolvable model. Every other failure mode (provider errors,
    /// timeouts, unparseable output) terminates in a valid report whose
    /// scores and notes reflect the degradation.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        snapshot: &RepoSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Report, PanelError> {
        if request.question.trim().is_empty() {
            return Err(PanelError::InvalidRequest("question is empty".into()));
        }

        // Resolve every role up front so configuration problems surface
        // before the first network call.
        let lead = self.router.resolve(PanelRole::LeadThinker, request.mode)?;
        let reviewer = self.router.resolve(PanelRole::Reviewer, request.mode)?;
        let synthesizer = self.router.resolve(PanelRole::Synthesizer, request.mode)?;
        let specialist_handle = self.router.resolve(PanelRole::Specialist, request.mode)?;

        let started = Instant::now();
        let mut models_used: Vec<String> = Vec::new();
        let mut degradation_notes: Vec<String> = Vec::new();
        let system_prompt = self.system_prompt();

        // ── LEAD ─────────────────────────────────────────────────
        tracing::info!(stage = %Stage::Lead, model = %lead.id, mode = %request.mode, "Panel run started");
        record_model(&mut models_used, &lead);

        let lead_prompt = prompts::lead_prompt(request, snapshot);
        let lead_call = invoke_bounded(
            self.invoker.as_ref(),
            &lead,
            &lead_prompt,
            system_prompt,
            self.config.call_timeout,
            cancel,
        );

        // Concurrent scheduling fans the specialists out alongside the
        // lead; they see only the request, never the draft.
        let (lead_result, mut specialists) = match self.config.scheduling {
            Scheduling::Concurrent => {
                record_model(&mut models_used, &specialist_handle);
                let (lead_result, outputs) = tokio::join!(
                    lead_call,
                    specialist::run_panel(
                        self.invoker.as_ref(),
                        &specialist_handle,
                        system_prompt,
                        self.config.call_timeout,
                        cancel,
                        request,
                        snapshot,
                        None,
                    )
                );
                (lead_result, Some(outputs))
            }
            Scheduling::Sequential => (lead_call.await, None),
        };

        let lead_text = match lead_result {
            Ok(output) if !output.text.trim().is_empty() => output.text,
            Ok(_) => {
                tracing::error!(stage = %Stage::Error, model = %lead.id, "Lead returned empty output");
                return Ok(self.finish_error_report(
                    lead_failure_report(request, "the lead model returned an empty response"),
                    snapshot,
                    started,
                    models_used,
                    specialists,
                ));
            }
            Err(InvokeError::Auth(reason)) => {
                tracing::error!(stage = %Stage::Error, model = %lead.id, %reason, "Lead authentication failed");
                return Ok(self.finish_error_report(
                    auth_failure_report(request, &reason),
                    snapshot,
                    started,
                    models_used,
                    specialists,
                ));
            }
            Err(err) => {
                tracing::error!(stage = %Stage::Error, model = %lead.id, error = %err, "Lead invocation failed");
                return Ok(self.finish_error_report(
                    lead_failure_report(request, &err.to_string()),
                    snapshot,
                    started,
                    models_used,
                    specialists,
                ));
            }
        };

        let mut lead_report = normalize::normalize(&lead_text, request);
        // Verify the draft now so the reviewer sees annotated citations.
        verify::verify(&mut lead_report, snapshot);
        let lead_json =
            serde_json::to_string(&lead_report).unwrap_or_else(|_| lead_text.clone());

        if specialists.is_none() {
            record_model(&mut models_used, &specialist_handle);
            // Sequential scheduling: the draft exists, so the specialists
            // get to see it.
            specialists = Some(
                specialist::run_panel(
                    self.invoker.as_ref(),
                    &specialist_handle,
                    system_prompt,
                    self.config.call_timeout,
                    cancel,
                    request,
                    snapshot,
                    Some(&lead_report),
                )
                .await,
            );
        }

        // ── REVIEW ───────────────────────────────────────────────
        tracing::info!(stage = %Stage::Review, model = %reviewer.id, "Reviewing lead draft");
        record_model(&mut models_used, &reviewer);

        let review_prompt = prompts::review_prompt(request, snapshot, &lead_json);
        let review_draft = match invoke_bounded(
            self.invoker.as_ref(),
            &reviewer,
            &review_prompt,
            system_prompt,
            self.config.call_timeout,
            cancel,
        )
        .await
        {
            Ok(output) => match normalize::parse_review_draft(&output.text) {
                Some(draft) => draft,
                None => {
                    degradation_notes
                        .push("Review stage produced unparseable output; proceeding with the lead draft".into());
                    ReviewDraft::degenerate("unparseable reviewer output")
                }
            },
            Err(err) => {
                tracing::warn!(stage = %Stage::Review, error = %err, "Review invocation failed; continuing");
                degradation_notes.push(format!("Review stage unavailable ({err}); proceeding with the lead draft"));
                ReviewDraft::degenerate(&err.to_string())
            }
        };

        let computed_disagreement = disagreement_score(
            lead_report.findings.len(),
            review_draft.issues.len(),
            review_draft.patch.is_some(),
        );
        let review_json =
            serde_json::to_string(&review_draft).unwrap_or_else(|_| "{}".to_string());

        // ── SYNTHESIZE ───────────────────────────────────────────
        tracing::info!(stage = %Stage::Synthesize, model = %synthesizer.id, "Synthesizing final report");
        record_model(&mut models_used, &synthesizer);

        let synth_prompt = prompts::synth_prompt(request, snapshot, &lead_json, &review_json);
        let synth_result = invoke_bounded(
            self.invoker.as_ref(),
            &synthesizer,
            &synth_prompt,
            system_prompt,
            self.config.call_timeout,
            cancel,
        )
        .await;

        let mut report = match synth_result {
            Ok(output) if request.adaptive_layout => {
                let mut base = best_draft(&review_draft, &lead_report);
                if output.text.trim().is_empty() {
                    degradation_notes.push("Synthesizer returned no adaptive text".into());
                } else {
                    base.adaptive_text = Some(output.text);
                }
                base
            }
            Ok(output) => match normalize::try_parse_report(&output.text, request) {
                Some(parsed) => parsed,
                None => {
                    tracing::warn!(stage = %Stage::Synthesize, "Synthesizer output unstructured; using best earlier draft");
                    degradation_notes
                        .push("Synthesizer output was unstructured; report assembled from earlier stages".into());
                    best_draft(&review_draft, &lead_report)
                }
            },
            Err(err) => {
                tracing::warn!(stage = %Stage::Synthesize, error = %err, "Synthesis failed; using best earlier draft");
                degradation_notes
                    .push(format!("Synthesis unavailable ({err}); report assembled from earlier stages"));
                best_draft(&review_draft, &lead_report)
            }
        };
        report.clamp_in_place();
        for note in &degradation_notes {
            report.append_note(note);
        }

        // ── DONE ─────────────────────────────────────────────────
        let verification = verify::verify(&mut report, snapshot);
        let meta = &mut report.metadata;
        meta.execution_time_ms = Some(started.elapsed().as_millis() as u64);
        meta.models_used = models_used;
        meta.repo_files_scanned = Some(snapshot.file_count());
        meta.timestamp = Some(chrono::Utc::now().to_rfc3339());
        meta.disagreement_score = Some(meta.disagreement_score.unwrap_or(computed_disagreement));
        meta.panel_pipeline = Some(true);
        meta.extended_agent_outputs = specialists;
        meta.self_check_passed = Some(
            !report.summary.trim().is_empty() && verification.hallucination_count == 0,
        );

        tracing::info!(
            stage = %Stage::Done,
            elapsed_ms = report.metadata.execution_time_ms,
            findings = report.findings.len(),
            hallucinations = verification.hallucination_count,
            "Panel run complete"
        );
        Ok(report)
    }

    fn system_prompt(&self) -> Option<&str> {
        Some(
            self.config
                .system_prompt
                .as_deref()
                .unwrap_or(prompts::PANEL_SYSTEM_PROMPT),
        )
    }

    /// Finalize an error-path report with the same metadata discipline as
    /// the success path. Specialists that already ran still attach.
    fn finish_error_report(
        &self,
        mut report: Report,
        snapshot: &RepoSnapshot,
        started: Instant,
        models_used: Vec<String>,
        specialists: Option<ExtendedAgentOutputs>,
    ) -> Report {
        let meta = &mut report.metadata;
        meta.execution_time_ms = Some(started.elapsed().as_millis() as u64);
        meta.models_used = models_used;
        meta.repo_files_scanned = Some(snapshot.file_count());
        meta.timestamp = Some(chrono::Utc::now().to_rfc3339());
        meta.panel_pipeline = Some(false);
        meta.self_check_passed = Some(false);
        meta.extended_agent_outputs = specialists;
        report
    }
}

// ── Degradation helpers ──────────────────────────────────────────

/// The best fully-formed report available before synthesis: the reviewer's
/// patch when it rewrote the draft, else the lead draft itself.
///
/// Only the synthesizer's own `disagreementScore` may take precedence over
/// the pipeline-computed one, so whatever an earlier stage emitted there
/// is cleared.
fn best_draft(review: &ReviewDraft, lead: &Report) -> Report {
    let mut draft = match &review.patch {
        Some(patch) => {
            let mut patched = patch.clone();
            patched.clamp_in_place();
            patched
        }
        None => lead.clone(),
    };
    draft.metadata.disagreement_score = None;
    draft
}

/// Score how far the review diverged from the lead draft, 0-100.
///
/// A patch, or issues covering at least half the draft's findings, counts
/// as substantial disagreement. A clean review is not zero: two models
/// never read a system identically.
fn disagreement_score(lead_findings: usize, issues: usize, patched: bool) -> u8 {
    if issues == 0 && !patched {
        return 15;
    }
    if patched || issues * 2 >= lead_findings.max(1) {
        return (71 + 3 * issues).min(100) as u8;
    }
    let proportional = issues * 70 / lead_findings.max(1);
    (proportional as u8).clamp(31, 70)
}

fn record_model(models_used: &mut Vec<String>, handle: &ModelHandle) {
    if !models_used.iter().any(|id| id == &handle.id) {
        models_used.push(handle.id.clone());
    }
}

// ── Error-path reports ───────────────────────────────────────────

/// Credential rejection at the lead stage: the run cannot proceed and the
/// report tells the operator exactly what to fix.
fn auth_failure_report(request: &AnalysisRequest, reason: &str) -> Report {
    let mut report = Report::skeleton(request.mode, request.question.clone());
    report.summary =
        "Analysis could not run: the configured API credentials were rejected.".into();
    report.findings.push(Finding {
        id: "auth-failure".into(),
        title: "Model credentials rejected".into(),
        description: format!(
            "The lead model provider rejected the configured API key ({reason}). \
             No analysis stages were able to run."
        ),
        severity: 10,
        confidence: Some(100),
        ..Finding::default()
    });
    report.recommendations.push(Recommendation {
        id: "configure-credentials".into(),
        title: "Configure valid API credentials".into(),
        description: "Set DEEPSEEK_API_KEY (and optionally GEMINI_API_KEY, \
                      PERPLEXITY_API_KEY) to valid provider keys, then retry. \
                      Placeholder values such as \"sk-...\" are treated as absent."
            .into(),
        expected_impact: "The panel can reach its providers and produce a real analysis".into(),
        priority: Some(1),
        ..Recommendation::default()
    });
    report.overall_risk_score = 100;
    report.confidence = 0;
    report.notes = Some("Run aborted at the lead stage due to an authentication failure".into());
    report
}

/// Any other lead-stage failure: nothing downstream can run without a
/// draft, so the run terminates with a diagnostic report.
fn lead_failure_report(request: &AnalysisRequest, reason: &str) -> Report {
    let mut report = Report::skeleton(request.mode, request.question.clone());
    report.summary = "Analysis could not run: the lead model produced no usable draft.".into();
    report.findings.push(Finding {
        id: "lead-failure".into(),
        title: "Lead stage failed".into(),
        description: format!(
            "The lead model invocation did not produce a draft ({reason}). \
             The review and synthesis stages require a draft and were skipped."
        ),
        severity: 10,
        ..Finding::default()
    });
    report.overall_risk_score = 100;
    report.confidence = 0;
    report.notes = Some(format!("Run aborted at the lead stage: {reason}"));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AnalysisMode;

    #[test]
    fn clean_review_scores_low_but_nonzero() {
        assert_eq!(disagreement_score(5, 0, false), 15);
        assert_eq!(disagreement_score(0, 0, false), 15);
    }

    #[test]
    fn patch_always_scores_high() {
        assert_eq!(disagreement_score(10, 0, true), 71);
        assert_eq!(disagreement_score(10, 5, true), 86);
    }

    #[test]
    fn issue_majority_scores_high() {
        // 3 issues against 5 findings: 6 >= 5.
        assert_eq!(disagreement_score(5, 3, false), 80);
        // Saturates at 100.
        assert_eq!(disagreement_score(4, 20, false), 100);
    }

    #[test]
    fn minority_issues_score_proportionally() {
        // 2 issues against 10 findings: 2*70/10 = 14, floored to 31.
        assert_eq!(disagreement_score(10, 2, false), 31);
        // 4 issues against 10 findings: 28, still floored.
        assert_eq!(disagreement_score(10, 4, false), 31);
        // 14 issues against 30 findings: 14*70/30 = 32, inside the band.
        assert_eq!(disagreement_score(30, 14, false), 32);
    }

    #[test]
    fn auth_report_shape() {
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "q");
        let report = auth_failure_report(&request, "401 unauthorized");
        assert_eq!(report.overall_risk_score, 100);
        assert_eq!(report.confidence, 0);
        assert!(report.findings[0].description.contains("401 unauthorized"));
        assert!(report.recommendations[0]
            .description
            .contains("DEEPSEEK_API_KEY"));
    }

    #[test]
    fn lead_failure_report_shape() {
        let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "q");
        let report = lead_failure_report(&request, "provider error: 503");
        assert_eq!(report.overall_risk_score, 100);
        assert_eq!(report.confidence, 0);
        assert!(report.notes.as_deref().unwrap_or("").contains("503"));
    }

    #[test]
    fn best_draft_prefers_patch() {
        let lead = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        let mut patch = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        patch.summary = "patched view".into();
        let review = ReviewDraft {
            review_summary: "rewrote".into(),
            issues: Vec::new(),
            patch: Some(patch),
        };
        assert_eq!(best_draft(&review, &lead).summary, "patched view");
        let clean = ReviewDraft::degenerate("down");
        assert_eq!(best_draft(&clean, &lead).summary, lead.summary);
    }

    #[test]
    fn best_draft_drops_stale_disagreement() {
        let mut lead = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        lead.metadata.disagreement_score = Some(5);
        let mut patch = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        patch.metadata.disagreement_score = Some(7);
        let review = ReviewDraft {
            review_summary: "rewrote".into(),
            issues: Vec::new(),
            patch: Some(patch),
        };
        assert!(best_draft(&review, &lead)
            .metadata
            .disagreement_score
            .is_none());
        let clean = ReviewDraft::degenerate("down");
        assert!(best_draft(&clean, &lead)
            .metadata
            .disagreement_score
            .is_none());
    }
}
