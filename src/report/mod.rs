//! Report data model.
//!
//! Value types exchanged between panel stages and returned to the caller.
//! Wire names are camelCase to match what the stage prompts instruct the
//! models to emit, so a stage's JSON output round-trips through serde
//! without a rename layer.
//!
//! Everything here is an immutable value once a stage returns it; the only
//! mutation points are the normalizer's clamping pass and the evidence
//! verifier's in-place annotation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::specialist::ExtendedAgentOutputs;

// ── Analysis mode ────────────────────────────────────────────────

/// What kind of question the panel is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Diagnose a software pipeline against its repository.
    #[default]
    PipelineDiagnosis,
    /// Critique an agent's output.
    AgentOutputCritique,
    /// Review and redesign a prompt.
    MetaPromptArchitect,
}

impl AnalysisMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::PipelineDiagnosis => "pipeline_diagnosis",
            Self::AgentOutputCritique => "agent_output_critique",
            Self::MetaPromptArchitect => "meta_prompt_architect",
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Impact area ──────────────────────────────────────────────────

/// Closed enumeration of areas a finding can impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImpactArea {
    Architecture,
    Performance,
    Scalability,
    Reliability,
    Security,
    Ux,
    Devx,
    /// Anything the model labelled outside the closed set.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ImpactArea {
    /// Lenient parse for model-supplied labels.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "architecture" => Self::Architecture,
            "performance" => Self::Performance,
            "scalability" => Self::Scalability,
            "reliability" => Self::Reliability,
            "security" => Self::Security,
            "ux" => Self::Ux,
            "devx" => Self::Devx,
            _ => Self::Unknown,
        }
    }
}

// ── Difficulty ───────────────────────────────────────────────────

/// Implementation difficulty of a recommendation.
///
/// `Medium` sits last because `#[serde(other)]` is only accepted on the
/// final variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Low,
    High,
    #[default]
    #[serde(other)]
    Medium,
}

impl Difficulty {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

// ── Evidence ─────────────────────────────────────────────────────

/// A citation of a repository file backing a finding.
///
/// `file_path` may carry a trailing line-range suffix ("a.rs:20-50");
/// after verification the file-only portion either exists in the active
/// snapshot or `reasoning` carries the not-verified marker.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Evidence {
    pub file_path: String,
    pub snippet: String,
    pub reasoning: String,
}

// ── Finding ──────────────────────────────────────────────────────

/// A single issue the panel identified.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub description: String,
    pub evidence: Vec<Evidence>,
    /// 1 (minor) to 10 (critical). Clamped by the normalizer.
    pub severity: u8,
    pub impact_area: ImpactArea,
    /// 0-100, when the model stated one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

// ── Recommendation ───────────────────────────────────────────────

/// A suggested action, optionally scored along several axes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub expected_impact: String,
    pub difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_findings: Option<Vec<String>>,
    /// 1-10 priority, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi_estimate: Option<String>,
    /// 0-100 feasibility, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feasibility_score: Option<u8>,
    /// Continuous focus time the change needs, in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_minutes: Option<u32>,
    /// 0-100 alignment with the project's stated direction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment_score: Option<u8>,
}

// ── Metadata ─────────────────────────────────────────────────────

/// Cross-stage metadata computed when the pipeline completes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Models invoked, in order, deduplicated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_files_scanned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// 0-100 measure of how far the review diverged from the lead draft.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disagreement_score: Option<u8>,
    /// Structural completeness check over the final report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_check_passed: Option<bool>,
    /// Whether the full 3-stage panel produced this report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_pipeline: Option<bool>,
    /// Specialist panel sub-reports, each independently present or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_agent_outputs: Option<ExtendedAgentOutputs>,
}

// ── Report ───────────────────────────────────────────────────────

/// The panel's sole output: a validated, structured analysis.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub mode: AnalysisMode,
    pub question: String,
    pub summary: String,
    pub assumptions: Vec<String>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    /// 0-100. Clamped by the normalizer, never trusted verbatim.
    pub overall_risk_score: u8,
    /// 0-100. Clamped by the normalizer.
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Free-text answer when structured output is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_text: Option<String>,
    pub metadata: Metadata,
}

impl Report {
    /// Empty report shell carrying the request's mode and question.
    pub fn skeleton(mode: AnalysisMode, question: impl Into<String>) -> Self {
        Self {
            mode,
            question: question.into(),
            overall_risk_score: 50,
            confidence: 70,
            metadata: Metadata {
                timestamp: Some(Utc::now().to_rfc3339()),
                ..Metadata::default()
            },
            ..Self::default()
        }
    }

    /// Re-clamp every numeric field into its declared range and fill in
    /// missing IDs. Used on reports that entered through a lenient serde
    /// path (e.g. a reviewer patch) instead of the normalizer.
    pub fn clamp_in_place(&mut self) {
        self.overall_risk_score = self.overall_risk_score.min(100);
        self.confidence = self.confidence.min(100);
        for f in &mut self.findings {
            f.severity = f.severity.clamp(1, 10);
            f.confidence = f.confidence.map(|c| c.min(100));
            if f.id.trim().is_empty() {
                f.id = generated_id("finding");
            }
        }
        for r in &mut self.recommendations {
            r.priority = r.priority.map(|p| p.clamp(1, 10));
            r.feasibility_score = r.feasibility_score.map(|s| s.min(100));
            r.alignment_score = r.alignment_score.map(|s| s.min(100));
            if r.id.trim().is_empty() {
                r.id = generated_id("rec");
            }
        }
        if let Some(score) = self.metadata.disagreement_score {
            self.metadata.disagreement_score = Some(score.min(100));
        }
    }

    /// Append to `notes`, separating entries with "; ".
    pub fn append_note(&mut self, note: &str) {
        match &mut self.notes {
            Some(existing) if !existing.trim().is_empty() => {
                existing.push_str("; ");
                existing.push_str(note);
            }
            _ => self.notes = Some(note.to_string()),
        }
    }
}

// ── Review draft ─────────────────────────────────────────────────

/// One issue the reviewer raised against the lead draft.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewIssue {
    pub id: String,
    /// 1-10.
    pub severity: u8,
    pub description: String,
}

/// The reviewer stage's structured critique.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewDraft {
    pub review_summary: String,
    pub issues: Vec<ReviewIssue>,
    /// Full replacement report, when the reviewer chose to rewrite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Report>,
}

impl ReviewDraft {
    /// Degenerate draft used when the reviewer invocation failed: the
    /// pipeline continues as if the review raised nothing.
    pub fn degenerate(reason: &str) -> Self {
        Self {
            review_summary: format!("Review unavailable: {reason}"),
            issues: Vec::new(),
            patch: None,
        }
    }
}

// ── Analysis request ─────────────────────────────────────────────

/// Caller input for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisRequest {
    pub mode: AnalysisMode,
    pub question: String,
    /// Patterns or explicit paths whose full content goes into the lead prompt.
    pub related_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_traces: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_prompt: Option<String>,
    /// When set, the synthesizer answers in natural text instead of the
    /// structured report schema; the text lands in `Report::adaptive_text`.
    pub adaptive_layout: bool,
}

impl AnalysisRequest {
    pub fn new(mode: AnalysisMode, question: impl Into<String>) -> Self {
        Self {
            mode,
            question: question.into(),
            ..Self::default()
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Fresh ID for entities the model left unnamed. Stable only for the
/// lifetime of the report it lands in.
pub fn generated_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &uuid[..8])
}

/// Clamp an arbitrary numeric value into 1..=10 severity.
pub fn clamp_severity(v: f64) -> u8 {
    if !v.is_finite() {
        return 5;
    }
    (v.round() as i64).clamp(1, 10) as u8
}

/// Clamp an arbitrary numeric value into a 0..=100 score.
pub fn clamp_score(v: f64) -> u8 {
    if !v.is_finite() {
        return 0;
    }
    (v.round() as i64).clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_labels_round_trip() {
        for mode in [
            AnalysisMode::PipelineDiagnosis,
            AnalysisMode::AgentOutputCritique,
            AnalysisMode::MetaPromptArchitect,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.label()));
            let back: AnalysisMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[test]
    fn difficulty_round_trips_and_absorbs_novel_labels() {
        for (wire, expected) in [
            ("\"low\"", Difficulty::Low),
            ("\"medium\"", Difficulty::Medium),
            ("\"high\"", Difficulty::High),
            ("\"herculean\"", Difficulty::Medium),
        ] {
            let parsed: Difficulty = serde_json::from_str(wire).unwrap();
            assert_eq!(parsed, expected, "for {wire}");
        }
        assert_eq!(
            serde_json::to_string(&Difficulty::Medium).unwrap(),
            "\"medium\""
        );
    }

    #[test]
    fn impact_area_unknown_for_novel_labels() {
        assert_eq!(ImpactArea::parse("founder-stress"), ImpactArea::Unknown);
        assert_eq!(ImpactArea::parse("SECURITY"), ImpactArea::Security);
        let parsed: ImpactArea = serde_json::from_str("\"cost\"").unwrap();
        assert_eq!(parsed, ImpactArea::Unknown);
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = Report::skeleton(AnalysisMode::PipelineDiagnosis, "why is it slow?");
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("overallRiskScore").is_some());
        assert!(json.get("overall_risk_score").is_none());
    }

    #[test]
    fn lenient_report_deserialization() {
        // A partial patch with unknown fields must still parse.
        let json = r#"{
            "mode": "pipeline_diagnosis",
            "summary": "patched",
            "findings": [{"title": "t", "severity": 12, "impactArea": "weird"}],
            "somethingExtra": true
        }"#;
        let mut report: Report = serde_json::from_str(json).unwrap();
        report.clamp_in_place();
        assert_eq!(report.summary, "patched");
        assert_eq!(report.findings[0].severity, 10);
        assert_eq!(report.findings[0].impact_area, ImpactArea::Unknown);
        assert!(report.findings[0].id.starts_with("finding-"));
    }

    #[test]
    fn clamp_helpers() {
        assert_eq!(clamp_severity(0.0), 1);
        assert_eq!(clamp_severity(99.0), 10);
        assert_eq!(clamp_severity(f64::NAN), 5);
        assert_eq!(clamp_score(-5.0), 0);
        assert_eq!(clamp_score(250.0), 100);
    }

    #[test]
    fn append_note_joins() {
        let mut report = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        report.append_note("first");
        report.append_note("second");
        assert_eq!(report.notes.as_deref(), Some("first; second"));
    }

    #[test]
    fn degenerate_review_draft_is_empty() {
        let draft = ReviewDraft::degenerate("timeout");
        assert!(draft.issues.is_empty());
        assert!(draft.patch.is_none());
        assert!(draft.review_summary.contains("timeout"));
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = generated_id("finding");
        let b = generated_id("finding");
        assert!(a.starts_with("finding-"));
        assert_ne!(a, b);
    }
}
